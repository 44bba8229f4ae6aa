//! Binary value serialization.
//!
//! Every value starts with a 16-byte record:
//!
//! | bytes  | field    |
//! |--------|----------|
//! | 0..8   | payload  |
//! | 8      | kind     |
//! | 9      | flags    |
//! | 10..12 | reserved |
//! | 12..16 | aux      |
//!
//! Strings are followed by their bytes (`aux` holds the length), arrays by
//! `aux` children and tables by `aux` key/value pairs. All integers are
//! little endian.

use log::debug;

use crate::{
    CaptureInfo, Engine, ErrorCode, Extension, ExtensionKind, FunctionPrototype, ObjectType, Ref,
    Result, TypeMask, Value,
    bytecode::{decode_all, encode_all},
    error::bail,
    objects::CaptureSource,
};

pub const RECORD_SIZE: usize = 16;

/// Options of [`to_binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct SerializeFlags(pub u32);

impl SerializeFlags {
    pub const NONE: Self = Self(0);
    /// Write null for kinds without a binary form instead of failing.
    pub const SKIP_UNSUPPORTED: Self = Self(1 << 0);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// Record flag of a capture index that refers to an outer capture.
const CAPTURE_OUTER: u8 = 1;

/// Deepest container or prototype nesting [`from_binary`] accepts.
pub const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    payload: u64,
    kind: u8,
    flags: u8,
    aux: u32,
}

impl Record {
    fn new(kind: ObjectType, payload: u64, aux: u32) -> Self {
        Self {
            payload,
            kind: kind.into(),
            flags: 0,
            aux,
        }
    }

    fn write(self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.payload.to_le_bytes());
        buffer.push(self.kind);
        buffer.push(self.flags);
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.aux.to_le_bytes());
    }

    fn read(bytes: &[u8]) -> Self {
        let mut payload = [0; 8];
        payload.copy_from_slice(&bytes[0..8]);
        let mut aux = [0; 4];
        aux.copy_from_slice(&bytes[12..16]);
        Self {
            payload: u64::from_le_bytes(payload),
            kind: bytes[8],
            flags: bytes[9],
            aux: u32::from_le_bytes(aux),
        }
    }
}

fn length(len: usize) -> Result<u32> {
    match u32::try_from(len) {
        Ok(len) => Ok(len),
        Err(_) => bail!(ErrorCode::InvalidSize, "{len} elements do not fit a record"),
    }
}

// ── writing ────────────────────────────────────────────────────────

struct Writer<'a> {
    buffer: &'a mut Vec<u8>,
    flags: SerializeFlags,
    /// Containers currently being written, to reject cycles.
    path: Vec<usize>,
}

impl Writer<'_> {
    fn string(&mut self, kind: ObjectType, text: &str) -> Result<()> {
        Record::new(kind, 0, length(text.len())?).write(self.buffer);
        self.buffer.extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn enter(&mut self, value: &Value) -> Result<()> {
        let addr = value.addr();
        if self.path.contains(&addr) {
            bail!(ErrorCode::InvalidOperation, "cannot serialize a recursive {}", value.type_name());
        }
        self.path.push(addr);
        Ok(())
    }

    fn value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => Record::new(ObjectType::Null, 0, 0).write(self.buffer),
            Value::None => Record::new(ObjectType::None, 0, 0).write(self.buffer),
            Value::Bool(b) => Record::new(ObjectType::Bool, *b as u64, 0).write(self.buffer),
            Value::Integer(i) => Record::new(ObjectType::Integer, *i as u64, 0).write(self.buffer),
            Value::Float(f) => Record::new(ObjectType::Float, f.to_bits(), 0).write(self.buffer),
            Value::Error(code) => {
                Record::new(ObjectType::Error, u16::from(*code) as u64, 0).write(self.buffer)
            }
            Value::Extension(ext) => {
                Record::new(ObjectType::Extension, ext.data, u8::from(ext.kind) as u32).write(self.buffer)
            }
            Value::SmallString(s) => self.string(ObjectType::SmallString, s.as_str())?,
            Value::LongString(s) => self.string(ObjectType::LongString, s.as_str())?,
            Value::StringView(s) => self.string(ObjectType::StringView, s)?,
            Value::MutableString(s) => self.string(ObjectType::MutableString, &s.borrow())?,
            Value::Array(array) => {
                self.enter(value)?;
                let items = array.to_vec();
                Record::new(ObjectType::Array, 0, length(items.len())?).write(self.buffer);
                for item in &items {
                    self.value(item)?;
                }
                self.path.pop();
            }
            Value::Table(table) => {
                self.enter(value)?;
                let entries = table.entries();
                Record::new(ObjectType::Table, 0, length(entries.len())?).write(self.buffer);
                for (key, item) in &entries {
                    self.value(key)?;
                    self.value(item)?;
                }
                self.path.pop();
            }
            Value::FunctionPrototype(proto) => self.prototype(proto)?,
            other => {
                if !self.flags.contains(SerializeFlags::SKIP_UNSUPPORTED) {
                    bail!(ErrorCode::InvalidOperation, "{} has no binary form", other.type_name());
                }
                debug!("serializing unsupported {} as null", other.type_name());
                Record::new(ObjectType::Null, 0, 0).write(self.buffer);
            }
        }
        Ok(())
    }

    /// A prototype record carries the stack size and the byte length of its
    /// encoded instructions. The instructions follow, then the name, the
    /// source name and five arrays: parameter names, restricted masks,
    /// default parameter registers, captures and literals. Nested
    /// prototypes come last as a sixth array.
    fn prototype(&mut self, proto: &FunctionPrototype) -> Result<()> {
        let code = encode_all(&proto.instructions);
        Record::new(ObjectType::FunctionPrototype, proto.stack_size as u64, length(code.len())?)
            .write(self.buffer);
        self.buffer.extend_from_slice(&code);

        self.string(ObjectType::LongString, &proto.name)?;
        self.string(ObjectType::LongString, &proto.source_name)?;

        Record::new(ObjectType::Array, 0, length(proto.parameter_names.len())?).write(self.buffer);
        for name in &proto.parameter_names {
            self.string(ObjectType::LongString, name)?;
        }

        Record::new(ObjectType::Array, 0, length(proto.restricted_types.len())?).write(self.buffer);
        for mask in &proto.restricted_types {
            Record::new(ObjectType::Integer, mask.0 as u64, 0).write(self.buffer);
        }

        Record::new(ObjectType::Array, 0, length(proto.default_params.len())?).write(self.buffer);
        for &register in &proto.default_params {
            Record::new(ObjectType::Integer, register as u64, 0).write(self.buffer);
        }

        Record::new(ObjectType::Array, 0, length(proto.captures.len())?).write(self.buffer);
        for capture in &proto.captures {
            self.string(ObjectType::LongString, &capture.name)?;
            let (index, flags) = match capture.source {
                CaptureSource::Local(index) => (index, 0),
                CaptureSource::Outer(index) => (index, CAPTURE_OUTER),
            };
            let mut record = Record::new(ObjectType::Integer, index as u64, 0);
            record.flags = flags;
            record.write(self.buffer);
        }

        Record::new(ObjectType::Array, 0, length(proto.literals.len())?).write(self.buffer);
        for literal in &proto.literals {
            self.value(literal)?;
        }

        Record::new(ObjectType::Array, 0, length(proto.functions.len())?).write(self.buffer);
        for nested in &proto.functions {
            self.prototype(nested)?;
        }
        Ok(())
    }
}

/// Appends the binary form of `value` to `buffer`.
///
/// On failure the buffer may hold a partial record stream.
pub fn to_binary(value: &Value, buffer: &mut Vec<u8>, flags: SerializeFlags) -> Result<()> {
    let mut writer = Writer {
        buffer,
        flags,
        path: Vec::new(),
    };
    writer.value(value)
}

/// Number of bytes [`to_binary`] writes for `value`.
pub fn binary_size(value: &Value, flags: SerializeFlags) -> Result<usize> {
    let mut buffer = Vec::new();
    to_binary(value, &mut buffer, flags)?;
    Ok(buffer.len())
}

// ── reading ────────────────────────────────────────────────────────

struct Reader<'a> {
    engine: &'a Engine,
    bytes: &'a [u8],
    offset: usize,
    depth: usize,
}

impl Reader<'_> {
    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            bail!(ErrorCode::OutOfBounds, "values nested deeper than {MAX_NESTING} levels");
        }
        self.depth += 1;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let end = self.offset.checked_add(len).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            bail!(
                ErrorCode::InvalidArgument,
                "need {len} bytes at offset {}, buffer holds {}",
                self.offset,
                self.bytes.len()
            );
        };
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn record(&mut self) -> Result<(Record, ObjectType)> {
        let record = Record::read(self.take(RECORD_SIZE)?);
        match ObjectType::try_from(record.kind) {
            Ok(kind) => Ok((record, kind)),
            Err(_) => bail!(ErrorCode::InvalidType, "unknown kind byte {}", record.kind),
        }
    }

    fn text(&mut self, len: u32) -> Result<String> {
        let bytes = self.take(len as usize)?;
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_owned()),
            Err(err) => bail!(ErrorCode::ConversionError, "string is not utf-8: {err}"),
        }
    }

    fn string(&mut self) -> Result<String> {
        let (record, kind) = self.record()?;
        if !TypeMask::STRING.contains(kind) {
            bail!(ErrorCode::InvalidType, "expected a string record, got {kind}");
        }
        self.text(record.aux)
    }

    fn array_len(&mut self) -> Result<usize> {
        let (record, kind) = self.record()?;
        if kind != ObjectType::Array {
            bail!(ErrorCode::InvalidType, "expected an array record, got {kind}");
        }
        Ok(record.aux as usize)
    }

    fn integer(&mut self) -> Result<(u64, u8)> {
        let (record, kind) = self.record()?;
        if kind != ObjectType::Integer {
            bail!(ErrorCode::InvalidType, "expected an integer record, got {kind}");
        }
        Ok((record.payload, record.flags))
    }

    fn value(&mut self) -> Result<Value> {
        let (record, kind) = self.record()?;
        Ok(match kind {
            ObjectType::Null => Value::Null,
            ObjectType::None => Value::None,
            ObjectType::Bool => Value::Bool(record.payload != 0),
            ObjectType::Integer => Value::Integer(record.payload as i64),
            ObjectType::Float => Value::Float(f64::from_bits(record.payload)),
            ObjectType::Error => match ErrorCode::try_from(record.payload as u16) {
                Ok(code) => Value::Error(code),
                Err(_) => bail!(ErrorCode::InvalidArgument, "unknown error code {}", record.payload),
            },
            ObjectType::Extension => match ExtensionKind::try_from(record.aux as u8) {
                Ok(kind) => Value::Extension(Extension {
                    kind,
                    data: record.payload,
                }),
                Err(_) => bail!(ErrorCode::InvalidArgument, "unknown extension kind {}", record.aux),
            },
            ObjectType::SmallString | ObjectType::LongString | ObjectType::StringView => {
                let text = self.text(record.aux)?;
                Value::new_string(self.engine, &text)?
            }
            ObjectType::MutableString => {
                let text = self.text(record.aux)?;
                Value::new_mutable_string(self.engine, text)?
            }
            ObjectType::Array => {
                self.descend()?;
                let mut items = Vec::with_capacity((record.aux as usize).min(1024));
                for _ in 0..record.aux {
                    items.push(self.value()?);
                }
                self.depth -= 1;
                Value::new_array(self.engine, items)?
            }
            ObjectType::Table => {
                self.descend()?;
                let table = Value::new_table(self.engine)?;
                if let Value::Table(t) = &table {
                    for _ in 0..record.aux {
                        let key = self.value()?;
                        let item = self.value()?;
                        t.insert(key, item);
                    }
                }
                self.depth -= 1;
                table
            }
            ObjectType::FunctionPrototype => {
                let proto = self.prototype(record)?;
                Value::FunctionPrototype(proto)
            }
            other => bail!(ErrorCode::InvalidOperation, "{other} has no binary form"),
        })
    }

    fn prototype(&mut self, record: Record) -> Result<Ref<FunctionPrototype>> {
        self.descend()?;
        let instructions = decode_all(self.take(record.aux as usize)?)?;
        let mut proto = FunctionPrototype {
            stack_size: record.payload as usize,
            instructions,
            name: self.string()?,
            source_name: self.string()?,
            ..Default::default()
        };

        for _ in 0..self.array_len()? {
            proto.parameter_names.push(self.string()?);
        }
        for _ in 0..self.array_len()? {
            proto.restricted_types.push(TypeMask(self.integer()?.0 as u32));
        }
        for _ in 0..self.array_len()? {
            proto.default_params.push(self.integer()?.0 as u32);
        }
        for _ in 0..self.array_len()? {
            let name = self.string()?;
            let (index, flags) = self.integer()?;
            proto.captures.push(if flags & CAPTURE_OUTER != 0 {
                CaptureInfo::outer(name, index as u32)
            } else {
                CaptureInfo::local(name, index as u32)
            });
        }
        for _ in 0..self.array_len()? {
            proto.literals.push(self.value()?);
        }
        for _ in 0..self.array_len()? {
            let (nested, kind) = self.record()?;
            if kind != ObjectType::FunctionPrototype {
                bail!(ErrorCode::InvalidType, "expected a prototype record, got {kind}");
            }
            proto.functions.push(self.prototype(nested)?);
        }

        self.depth -= 1;
        Ref::new(self.engine, proto)
    }
}

/// Reads one value starting at `offset`, advancing it past the value.
pub fn from_binary(engine: &Engine, bytes: &[u8], offset: &mut usize) -> Result<Value> {
    let mut reader = Reader {
        engine,
        bytes,
        offset: *offset,
        depth: 0,
    };
    let value = reader.value()?;
    *offset = reader.offset;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{BytecodeBuilder, strict_equals};

    fn round_trip(engine: &Engine, value: &Value) -> Value {
        let mut buffer = Vec::new();
        to_binary(value, &mut buffer, SerializeFlags::NONE).unwrap();
        let mut offset = 0;
        let back = from_binary(engine, &buffer, &mut offset).unwrap();
        assert_eq!(offset, buffer.len());
        back
    }

    #[test]
    fn scalars_and_strings_come_back_strict_equal() {
        let engine = Engine::default();
        let values = [
            Value::Null,
            Value::from(true),
            Value::from(-42),
            Value::from(2.5),
            Value::new_string(&engine, "short").unwrap(),
            Value::new_string(&engine, "a string well past the inline capacity").unwrap(),
            Value::Error(ErrorCode::ZeroDivision),
            Value::Error(ErrorCode::NameExists),
        ];
        for value in &values {
            let back = round_trip(&engine, value);
            assert!(strict_equals(value, &back), "{value:?} became {back:?}");
        }
    }

    #[test]
    fn containers_keep_order_and_contents() {
        let engine = Engine::default();
        let key = |text: &str| Value::new_string(&engine, text).unwrap();

        let inner = Value::new_table(&engine).unwrap();
        inner.as_table().unwrap().insert(key("deep"), Value::Error(ErrorCode::NotFound));
        let array = Value::new_array(&engine, vec![
            Value::from(1),
            Value::from(2.0),
            key("a string long enough to leave inline storage"),
            inner,
        ])
        .unwrap();
        let table = Value::new_table(&engine).unwrap();
        let t = table.as_table().unwrap();
        t.insert(key("b"), array);
        t.insert(Value::from(7), Value::from(false));
        t.insert(key("a"), Value::Null);

        let back = round_trip(&engine, &table);
        assert!(strict_equals(&table, &back), "{table:?} became {back:?}");
        let keys: Vec<Value> = back.as_table().unwrap().entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![key("b"), Value::from(7), key("a")]);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let engine = Engine::default();
        let mut buffer = Vec::new();
        for _ in 0..MAX_NESTING * 4 {
            Record::new(ObjectType::Array, 0, 1).write(&mut buffer);
        }
        Record::new(ObjectType::Null, 0, 0).write(&mut buffer);

        let mut offset = 0;
        let err = from_binary(&engine, &buffer, &mut offset).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutOfBounds);
        assert_eq!(offset, 0);

        let mut shallow = Vec::new();
        for _ in 0..MAX_NESTING {
            Record::new(ObjectType::Array, 0, 1).write(&mut shallow);
        }
        Record::new(ObjectType::Null, 0, 0).write(&mut shallow);
        let mut offset = 0;
        assert!(from_binary(&engine, &shallow, &mut offset).is_ok());
        assert_eq!(offset, shallow.len());
    }

    #[test]
    fn records_are_sixteen_bytes() {
        assert_eq!(binary_size(&Value::from(1), SerializeFlags::NONE).unwrap(), RECORD_SIZE);
        assert_eq!(
            binary_size(&Value::string_view("abc"), SerializeFlags::NONE).unwrap(),
            RECORD_SIZE + 3
        );
    }

    #[test]
    fn unsupported_kinds_fail_or_become_null() {
        let engine = Engine::default();
        let value = Value::RawPointer(0x10);
        let mut buffer = Vec::new();
        let err = to_binary(&value, &mut buffer, SerializeFlags::NONE).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOperation);

        buffer.clear();
        to_binary(&value, &mut buffer, SerializeFlags::SKIP_UNSUPPORTED).unwrap();
        let mut offset = 0;
        assert_eq!(from_binary(&engine, &buffer, &mut offset).unwrap(), Value::Null);
    }

    #[test]
    fn recursive_tables_are_rejected() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        table.as_table().unwrap().insert(Value::string_view("self"), table.clone());

        let err = to_binary(&table, &mut Vec::new(), SerializeFlags::NONE).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOperation);
        table.as_table().unwrap().remove(&Value::string_view("self"));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let engine = Engine::default();
        let mut buffer = Vec::new();
        to_binary(&Value::string_view("abcdef"), &mut buffer, SerializeFlags::NONE).unwrap();
        buffer.truncate(buffer.len() - 2);

        let mut offset = 0;
        let err = from_binary(&engine, &buffer, &mut offset).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(offset, 0);
    }

    #[test]
    fn prototypes_round_trip() {
        let engine = Engine::default();
        let mut code = BytecodeBuilder::new();
        code.load_int(1, 5);
        code.get_capture(2, 0);
        code.add(0, 1, 2);
        code.ret(0);

        let nested = Ref::new(&engine, FunctionPrototype {
            name: "inner".into(),
            stack_size: 1,
            ..Default::default()
        })
        .unwrap();
        let proto = FunctionPrototype {
            name: "main".into(),
            source_name: "main.zs".into(),
            instructions: code.finish(),
            literals: vec![Value::from(1.5)],
            functions: vec![nested],
            captures: vec![CaptureInfo::local("x", 3), CaptureInfo::outer("y", 0)],
            default_params: vec![4],
            parameter_names: vec!["this".into(), "a".into()],
            restricted_types: vec![TypeMask::NONE, TypeMask::NUMBER],
            stack_size: 6,
        };
        let value = Value::new_prototype(&engine, proto).unwrap();

        let back = round_trip(&engine, &value);
        let (Value::FunctionPrototype(a), Value::FunctionPrototype(b)) = (&value, &back) else {
            panic!("expected prototypes");
        };
        assert_eq!(b.name, a.name);
        assert_eq!(b.source_name, a.source_name);
        assert_eq!(b.instructions, a.instructions);
        assert_eq!(b.literals, a.literals);
        assert_eq!(b.captures, a.captures);
        assert_eq!(b.default_params, a.default_params);
        assert_eq!(b.parameter_names, a.parameter_names);
        assert_eq!(b.restricted_types, a.restricted_types);
        assert_eq!(b.stack_size, 6);
        assert_eq!(b.functions[0].name, "inner");
    }
}
