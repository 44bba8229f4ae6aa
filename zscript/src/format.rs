//! Textual rendering of values.

use std::fmt::{self, Write};

use serde_json::{Map, Number, Value as Json};

use crate::Value;

const RECURSION: &str = "<RECURSION>";
const INDENT: &str = "    ";

/// Rendering selected by [`Value::serialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializeFormat {
    /// Strings unquoted.
    #[default]
    Plain,
    /// Strings quoted and escaped.
    Quoted,
    /// Pretty printed JSON.
    Json,
    JsonCompact,
}

/// A value paired with a format, rendered through [`fmt::Display`].
pub struct Serialized<'a> {
    value: &'a Value,
    format: SerializeFormat,
}

impl Value {
    pub fn serialize(&self, format: SerializeFormat) -> Serialized<'_> {
        Serialized { value: self, format }
    }
}

impl fmt::Display for Serialized<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format {
            SerializeFormat::Plain | SerializeFormat::Quoted => {
                let mut text = TextWriter {
                    out: f,
                    quoted: self.format == SerializeFormat::Quoted,
                    path: Vec::new(),
                };
                text.value(self.value, 0)
            }
            SerializeFormat::Json => {
                let json = to_json(self.value, &mut Vec::new());
                let rendered = serde_json::to_string_pretty(&json).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
            SerializeFormat::JsonCompact => {
                let json = to_json(self.value, &mut Vec::new());
                let rendered = serde_json::to_string(&json).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.serialize(SerializeFormat::Plain).fmt(f)
    }
}

fn indent(out: &mut impl Write, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        out.write_str(INDENT)?;
    }
    Ok(())
}

fn write_quoted(out: &mut impl Write, text: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in text.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\t' => out.write_str("\\t")?,
            '\r' => out.write_str("\\r")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

fn write_markup(out: &mut impl Write, text: &str, in_attribute: bool) -> fmt::Result {
    for c in text.chars() {
        match c {
            '<' => out.write_str("&lt;")?,
            '>' => out.write_str("&gt;")?,
            '&' => out.write_str("&amp;")?,
            '"' if in_attribute => out.write_str("&quot;")?,
            '\'' if in_attribute => out.write_str("&apos;")?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}

struct TextWriter<'a, 'b> {
    out: &'a mut fmt::Formatter<'b>,
    quoted: bool,
    /// Addresses of the containers being rendered.
    path: Vec<usize>,
}

impl TextWriter<'_, '_> {
    fn value(&mut self, value: &Value, depth: usize) -> fmt::Result {
        if value.is_ref_counted() && self.path.contains(&value.addr()) {
            return self.out.write_str(RECURSION);
        }

        match value {
            Value::Null => self.out.write_str("null"),
            Value::None => self.out.write_str("none"),
            Value::Bool(b) => write!(self.out, "{b}"),
            Value::Integer(i) => write!(self.out, "{i}"),
            Value::Float(x) => write!(self.out, "{x}"),
            Value::Error(code) => write!(self.out, "error({code})"),
            Value::Array(array) => {
                self.path.push(value.addr());
                let items = array.to_vec();
                let result = self.array(&items, depth);
                self.path.pop();
                result
            }
            Value::Table(table) => {
                self.path.push(value.addr());
                let entries = table.entries();
                let result = self.table(&entries, depth);
                self.path.pop();
                result
            }
            Value::Node(_) => {
                self.path.push(value.addr());
                let result = self.node(value, depth);
                self.path.pop();
                result
            }
            other => match other.as_str() {
                Some(text) if self.quoted => write_quoted(self.out, &text),
                Some(text) => self.out.write_str(&text),
                None => write!(self.out, "<{}>", other.type_name()),
            },
        }
    }

    /// Arrays of inline values stay on one line.
    fn array(&mut self, items: &[Value], depth: usize) -> fmt::Result {
        let inline = items.iter().all(|item| !item.is_ref_counted() || item.is_string());
        self.out.write_char('[')?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.write_char(',')?;
            }
            if !inline {
                self.out.write_char('\n')?;
                indent(self.out, depth + 1)?;
            }
            self.value(item, depth + 1)?;
        }
        if !inline && !items.is_empty() {
            self.out.write_char('\n')?;
            indent(self.out, depth)?;
        }
        self.out.write_char(']')
    }

    fn table(&mut self, entries: &[(Value, Value)], depth: usize) -> fmt::Result {
        if entries.is_empty() {
            return self.out.write_str("{}");
        }
        self.out.write_str("{\n")?;
        for (i, (key, item)) in entries.iter().enumerate() {
            indent(self.out, depth + 1)?;
            self.value(key, depth + 1)?;
            self.out.write_str(": ")?;
            self.value(item, depth + 1)?;
            self.out.write_str(if i + 1 == entries.len() { "\n" } else { ",\n" })?;
        }
        indent(self.out, depth)?;
        self.out.write_char('}')
    }

    fn node(&mut self, value: &Value, depth: usize) -> fmt::Result {
        let Value::Node(node) = value else {
            return Ok(());
        };
        let name = node.name().as_str().map(|s| s.into_owned()).unwrap_or_default();

        self.out.write_char('<')?;
        self.out.write_str(&name)?;
        let attributes: Vec<(Value, Value)> = node
            .attributes()
            .iter()
            .map(|(k, v)| (k.value().clone(), v.clone()))
            .collect();
        for (key, attribute) in &attributes {
            self.out.write_char(' ')?;
            self.value(key, depth)?;
            self.out.write_str("=\"")?;
            match attribute.as_str() {
                Some(text) => write_markup(self.out, &text, true)?,
                None => self.value(attribute, depth)?,
            }
            self.out.write_char('"')?;
        }
        self.out.write_char('>')?;

        let count = node.child_count();
        let content = node.value();
        if !content.is_null_or_none() {
            if count > 0 {
                self.out.write_char('\n')?;
                indent(self.out, depth + 1)?;
            }
            match content.as_str() {
                Some(text) => write_markup(self.out, &text, false)?,
                None => self.value(&content, depth + 1)?,
            }
        }

        if count > 0 {
            self.out.write_char('\n')?;
            for i in 0..count {
                let Some(child) = node.child(i as i64) else {
                    continue;
                };
                indent(self.out, depth + 1)?;
                self.value(&child, depth + 1)?;
                self.out.write_char('\n')?;
            }
            indent(self.out, depth)?;
        }
        write!(self.out, "</{name}>")
    }
}

/// JSON form of a value. Non-string keys are stringified in plain mode,
/// values without a JSON form become their kind name.
fn to_json(value: &Value, path: &mut Vec<usize>) -> Json {
    if value.is_ref_counted() && path.contains(&value.addr()) {
        return Json::String(RECURSION.to_owned());
    }

    match value {
        Value::Null | Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::Number((*i).into()),
        Value::Float(x) => Number::from_f64(*x).map_or(Json::Null, Json::Number),
        Value::Array(array) => {
            path.push(value.addr());
            let items = array.to_vec().iter().map(|item| to_json(item, path)).collect();
            path.pop();
            Json::Array(items)
        }
        Value::Table(table) => {
            path.push(value.addr());
            let mut map = Map::new();
            for (key, item) in table.entries() {
                let key = match key.as_str() {
                    Some(text) => text.into_owned(),
                    None => key.to_string(),
                };
                map.insert(key, to_json(&item, path));
            }
            path.pop();
            Json::Object(map)
        }
        other => match other.as_str() {
            Some(text) => Json::String(text.into_owned()),
            None => Json::String(format!("<{}>", other.type_name())),
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Engine;

    fn sample(engine: &Engine) -> Value {
        let table = Value::new_table(engine).unwrap();
        let t = table.as_table().unwrap();
        t.insert(Value::string_view("name"), Value::string_view("a\"b"));
        t.insert(
            Value::string_view("list"),
            Value::new_array(engine, vec![Value::from(1), Value::from(2.5), Value::Null]).unwrap(),
        );
        table
    }

    #[test]
    fn primitives_render_per_mode() {
        let s = Value::string_view("hi");
        assert_eq!(s.serialize(SerializeFormat::Plain).to_string(), "hi");
        assert_eq!(s.serialize(SerializeFormat::Quoted).to_string(), "\"hi\"");
        assert_eq!(s.serialize(SerializeFormat::JsonCompact).to_string(), "\"hi\"");
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::None.to_string(), "none");
        assert_eq!(Value::None.serialize(SerializeFormat::Json).to_string(), "null");
    }

    #[test]
    fn table_plain_and_quoted() {
        let engine = Engine::default();
        let table = sample(&engine);
        assert_eq!(table.to_string(), "{\n    name: a\"b,\n    list: [1,2.5,null]\n}");
        assert_eq!(
            table.serialize(SerializeFormat::Quoted).to_string(),
            "{\n    \"name\": \"a\\\"b\",\n    \"list\": [1,2.5,null]\n}"
        );
    }

    #[test]
    fn json_modes_keep_insertion_order() {
        let engine = Engine::default();
        let table = sample(&engine);
        assert_eq!(
            table.serialize(SerializeFormat::JsonCompact).to_string(),
            r#"{"name":"a\"b","list":[1,2.5,null]}"#
        );
        assert_eq!(
            table.serialize(SerializeFormat::Json).to_string(),
            "{\n  \"name\": \"a\\\"b\",\n  \"list\": [\n    1,\n    2.5,\n    null\n  ]\n}"
        );
    }

    #[test]
    fn self_reference_is_marked() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        table.as_table().unwrap().insert(Value::string_view("me"), table.clone());

        assert_eq!(table.to_string(), "{\n    me: <RECURSION>\n}");
        assert_eq!(
            table.serialize(SerializeFormat::JsonCompact).to_string(),
            r#"{"me":"<RECURSION>"}"#
        );
        table.as_table().unwrap().remove(&Value::string_view("me"));
    }

    #[test]
    fn nested_containers_break_lines() {
        let engine = Engine::default();
        let inner = Value::new_array(&engine, vec![Value::from(1)]).unwrap();
        let outer = Value::new_array(&engine, vec![inner, Value::from(2)]).unwrap();
        assert_eq!(outer.to_string(), "[\n    [1],\n    2\n]");
    }
}
