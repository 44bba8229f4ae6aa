use crate::{ErrorCode, Result, Value, error::bail};

/// Value stack shared by every frame of one VM.
///
/// Frames address their registers relative to a base index. A call's base
/// is the stack top at the moment of the call, and leaving the call
/// truncates the stack back to that point.
pub(crate) struct RegisterStack {
    values: Vec<Value>,
    limit: usize,
}

impl RegisterStack {
    pub fn new(limit: usize) -> Self {
        Self {
            values: Vec::with_capacity(limit.min(1024)),
            limit,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.values.len() >= self.limit {
            bail!(ErrorCode::StackError, "register stack overflow ({} values)", self.limit);
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.values.pop()
    }

    pub fn last(&self) -> Option<&Value> {
        self.values.last()
    }

    /// Grows the stack with nulls up to `len`.
    pub fn pad_to(&mut self, len: usize) -> Result<()> {
        if len > self.limit {
            bail!(ErrorCode::StackError, "frame needs {len} registers, limit is {}", self.limit);
        }
        if len > self.values.len() {
            self.values.resize(len, Value::Null);
        }
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.values.get_mut(index)
    }

    /// Removes and returns everything from `start` to the top.
    pub fn split_off(&mut self, start: usize) -> Vec<Value> {
        self.values.split_off(start.min(self.values.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_enforced() {
        let mut stack = RegisterStack::new(2);
        stack.push(Value::from(1)).unwrap();
        stack.pad_to(2).unwrap();
        assert!(stack.get(1).unwrap().is_null());
        assert_eq!(stack.push(Value::Null).unwrap_err().code, ErrorCode::StackError);
        assert_eq!(stack.pad_to(3).unwrap_err().code, ErrorCode::StackError);

        stack.truncate(1);
        assert_eq!(stack.split_off(0), vec![Value::from(1)]);
        assert_eq!(stack.len(), 0);
    }
}
