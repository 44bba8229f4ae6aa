use std::cell::RefCell;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    AllocTag, ErrorCode, ObjectType, Payload, Result, Value, error::bail,
    objects::strings::resolve_index,
};

/// Element type of a [`NativeArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum NativeArrayType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl NativeArrayType {
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    fn decode(self, bytes: &[u8]) -> Value {
        macro_rules! read {
            ($t:ty) => {{
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }};
        }

        match self {
            Self::I8 => Value::Integer(read!(i8) as i64),
            Self::I16 => Value::Integer(read!(i16) as i64),
            Self::I32 => Value::Integer(read!(i32) as i64),
            Self::I64 => Value::Integer(read!(i64)),
            Self::U8 => Value::Integer(read!(u8) as i64),
            Self::U16 => Value::Integer(read!(u16) as i64),
            Self::U32 => Value::Integer(read!(u32) as i64),
            Self::U64 => Value::Integer(read!(u64) as i64),
            Self::F32 => Value::Float(read!(f32) as f64),
            Self::F64 => Value::Float(read!(f64)),
        }
    }

    fn encode(self, value: &Value, out: &mut [u8]) -> Result<()> {
        if !value.is_number_or_bool() {
            bail!(
                ErrorCode::InvalidType,
                "cannot store {} in a {self:?} array",
                value.type_name()
            );
        }

        macro_rules! store {
            ($v:expr) => {
                out.copy_from_slice(&$v.to_le_bytes())
            };
        }

        match self {
            Self::I8 => store!(value.to_int()? as i8),
            Self::I16 => store!(value.to_int()? as i16),
            Self::I32 => store!(value.to_int()? as i32),
            Self::I64 => store!(value.to_int()?),
            Self::U8 => store!(value.to_int()? as u8),
            Self::U16 => store!(value.to_int()? as u16),
            Self::U32 => store!(value.to_int()? as u32),
            Self::U64 => store!(value.to_int()? as u64),
            Self::F32 => store!(value.to_float()? as f32),
            Self::F64 => store!(value.to_float()?),
        }
        Ok(())
    }
}

/// Packed array of fixed-width numbers.
pub struct NativeArray {
    ty: NativeArrayType,
    bytes: RefCell<Vec<u8>>,
    delegate: RefCell<Value>,
}

impl NativeArray {
    pub fn new(ty: NativeArrayType, len: usize) -> Self {
        Self::from_bytes(ty, vec![0; len * ty.size()])
    }

    /// `bytes` holds little-endian elements, any trailing partial element
    /// is dropped.
    pub fn from_bytes(ty: NativeArrayType, mut bytes: Vec<u8>) -> Self {
        bytes.truncate(bytes.len() / ty.size() * ty.size());
        Self {
            ty,
            bytes: RefCell::new(bytes),
            delegate: RefCell::new(Value::Null),
        }
    }

    pub fn element_type(&self) -> NativeArrayType {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.bytes.borrow().len() / self.ty.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    pub fn get(&self, index: i64) -> Result<Value> {
        let Some(i) = resolve_index(index, self.len()) else {
            bail!(ErrorCode::OutOfBounds, "index {index} out of {} elements", self.len());
        };
        let size = self.ty.size();
        Ok(self.ty.decode(&self.bytes.borrow()[i * size..(i + 1) * size]))
    }

    pub fn set(&self, index: i64, value: &Value) -> Result<()> {
        let Some(i) = resolve_index(index, self.len()) else {
            bail!(ErrorCode::OutOfBounds, "index {index} out of {} elements", self.len());
        };
        let size = self.ty.size();
        self.ty.encode(value, &mut self.bytes.borrow_mut()[i * size..(i + 1) * size])
    }

    pub fn push(&self, value: &Value) -> Result<()> {
        let mut raw = [0u8; 8];
        let size = self.ty.size();
        self.ty.encode(value, &mut raw[..size])?;
        self.bytes.borrow_mut().extend_from_slice(&raw[..size]);
        Ok(())
    }

    pub fn delegate(&self) -> Value {
        self.delegate.borrow().clone()
    }

    pub fn set_delegate(&self, delegate: Value) {
        *self.delegate.borrow_mut() = delegate;
    }
}

impl Payload for NativeArray {
    const KIND: ObjectType = ObjectType::NativeArray;
    const TAG: AllocTag = AllocTag::Array;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_elements() {
        let array = NativeArray::new(NativeArrayType::U8, 2);
        array.set(0, &Value::from(300)).unwrap();
        array.set(-1, &Value::from(2.7)).unwrap();
        assert_eq!(array.get(0).unwrap(), Value::from(44));
        assert_eq!(array.get(1).unwrap(), Value::from(2));

        let floats = NativeArray::new(NativeArrayType::F32, 1);
        floats.set(0, &Value::from(true)).unwrap();
        assert_eq!(floats.get(0).unwrap(), Value::from(1.0));
        floats.push(&Value::from(0.5)).unwrap();
        assert_eq!(floats.len(), 2);
    }

    #[test]
    fn rejects_bad_access() {
        let array = NativeArray::new(NativeArrayType::I32, 1);
        assert_eq!(array.get(1).unwrap_err().code, ErrorCode::OutOfBounds);
        let err = array.set(0, &Value::string_view("x")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidType);
    }
}
