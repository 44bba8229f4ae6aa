//! Numeric operators and their meta-method fallbacks.

use std::cmp::Ordering;

use crate::{
    ErrorCode, MetaMethod, Result, Value, Vm,
    compare::compare,
    error::bail,
    lookup::meta_method,
};

/// Binary arithmetic operator shared by the plain and compound opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    BitOr,
    BitAnd,
    BitXor,
    LShift,
    RShift,
}

impl ArithOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Exp => "**",
            Self::BitOr => "|",
            Self::BitAnd => "&",
            Self::BitXor => "^",
            Self::LShift => "<<",
            Self::RShift => ">>",
        }
    }

    /// Meta-method tried on the left operand.
    pub const fn meta(self) -> Option<MetaMethod> {
        match self {
            Self::Add => Some(MetaMethod::Add),
            Self::Sub => Some(MetaMethod::Sub),
            Self::Mul => Some(MetaMethod::Mul),
            Self::Div => Some(MetaMethod::Div),
            Self::Mod => Some(MetaMethod::Mod),
            Self::Exp => Some(MetaMethod::Exp),
            Self::LShift => Some(MetaMethod::LShift),
            Self::RShift => Some(MetaMethod::RShift),
            Self::BitOr | Self::BitAnd | Self::BitXor => None,
        }
    }

    /// Meta-method tried on the right operand, called with the operands
    /// swapped.
    pub const fn rhs_meta(self) -> Option<MetaMethod> {
        match self {
            Self::Add => Some(MetaMethod::RhsAdd),
            Self::Sub => Some(MetaMethod::RhsSub),
            Self::Mul => Some(MetaMethod::RhsMul),
            Self::Div => Some(MetaMethod::RhsDiv),
            Self::Mod => Some(MetaMethod::RhsMod),
            Self::Exp => Some(MetaMethod::RhsExp),
            _ => None,
        }
    }

    /// Meta-method of the compound form (`+=`, ...).
    pub const fn eq_meta(self) -> Option<MetaMethod> {
        match self {
            Self::Add => Some(MetaMethod::AddEq),
            Self::Sub => Some(MetaMethod::SubEq),
            Self::Mul => Some(MetaMethod::MulEq),
            Self::Div => Some(MetaMethod::DivEq),
            Self::Mod => Some(MetaMethod::ModEq),
            Self::Exp => Some(MetaMethod::ExpEq),
            Self::LShift => Some(MetaMethod::LShiftEq),
            Self::RShift => Some(MetaMethod::RShiftEq),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Number::Int(*b as i64)),
            Value::Integer(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Integer value of an integral number.
    fn integral(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
            Number::Float(_) => None,
        }
    }
}

/// Applies `op` when both operands are numbers or bools.
///
/// Returns `Ok(None)` for any other operand kind so the caller can try
/// meta-methods.
pub fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Option<Value>> {
    let (Some(l), Some(r)) = (Number::of(lhs), Number::of(rhs)) else {
        return Ok(None);
    };

    let value = match (l, r) {
        (Number::Int(l), Number::Int(r)) => Value::Integer(int_arith(op, l, r)?),
        _ => float_arith(op, l, r)?,
    };
    Ok(Some(value))
}

fn int_arith(op: ArithOp, l: i64, r: i64) -> Result<i64> {
    let value = match op {
        ArithOp::Add => l.wrapping_add(r),
        ArithOp::Sub => l.wrapping_sub(r),
        ArithOp::Mul => l.wrapping_mul(r),
        ArithOp::Div => {
            if r == 0 {
                bail!(ErrorCode::ZeroDivision, "integer division by zero");
            }
            l.wrapping_div(r)
        }
        ArithOp::Mod => {
            if r == 0 {
                bail!(ErrorCode::ZeroModulus, "integer modulo by zero");
            }
            l.wrapping_rem(r)
        }
        ArithOp::Exp => match u32::try_from(r) {
            Ok(exp) => l.wrapping_pow(exp),
            Err(_) => (l as f64).powf(r as f64) as i64,
        },
        ArithOp::BitOr => l | r,
        ArithOp::BitAnd => l & r,
        ArithOp::BitXor => l ^ r,
        ArithOp::LShift | ArithOp::RShift => {
            if !(0..64).contains(&r) {
                bail!(ErrorCode::InvalidOperation, "shift amount {r} out of range");
            }
            if op == ArithOp::LShift { l << r } else { l >> r }
        }
    };
    Ok(value)
}

fn float_arith(op: ArithOp, l: Number, r: Number) -> Result<Value> {
    let (lf, rf) = (l.as_f64(), r.as_f64());
    let value = match op {
        ArithOp::Add => lf + rf,
        ArithOp::Sub => lf - rf,
        ArithOp::Mul => lf * rf,
        ArithOp::Div => {
            if rf == 0.0 {
                bail!(ErrorCode::ZeroDivision, "float division by zero");
            }
            lf / rf
        }
        ArithOp::Mod => {
            if rf == 0.0 {
                bail!(ErrorCode::ZeroModulus, "float modulo by zero");
            }
            if matches!(l, Number::Int(_)) && r.integral().is_none() {
                bail!(ErrorCode::InvalidModulus, "integer modulo by non-integral {rf}");
            }
            lf % rf
        }
        ArithOp::Exp => lf.powf(rf),
        ArithOp::BitOr | ArithOp::BitAnd | ArithOp::BitXor | ArithOp::LShift | ArithOp::RShift => {
            let (Some(li), Some(ri)) = (l.integral(), r.integral()) else {
                bail!(
                    ErrorCode::InvalidOperation,
                    "'{}' needs integral operands, got {lf} and {rf}",
                    op.symbol()
                );
            };
            return Ok(Value::Integer(int_arith(op, li, ri)?));
        }
    };
    Ok(Value::Float(value))
}

impl Vm {
    /// Full binary operator dispatch: numbers first, then `__op` on the left
    /// operand, then `__rhs_op` on the right one.
    pub(crate) fn binary_op(&mut self, op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        if let Some(value) = arith(op, lhs, rhs)? {
            return Ok(value);
        }

        if let Some(method) = op.meta().and_then(|m| meta_method(lhs, m)) {
            return self.call_value(&method, &[lhs.clone(), rhs.clone()]);
        }
        if let Some(method) = op.rhs_meta().and_then(|m| meta_method(rhs, m)) {
            return self.call_value(&method, &[rhs.clone(), lhs.clone()]);
        }

        bail!(
            ErrorCode::InvalidType,
            "cannot apply '{}' to {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        )
    }

    /// Compound assignment: `__op_eq` when the left operand defines it,
    /// plain dispatch otherwise.
    pub(crate) fn compound_op(&mut self, op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        if !lhs.is_number_or_bool() {
            if let Some(method) = op.eq_meta().and_then(|m| meta_method(lhs, m)) {
                return self.call_value(&method, &[lhs.clone(), rhs.clone()]);
            }
        }
        self.binary_op(op, lhs, rhs)
    }

    /// Three-way comparison, falling back to `__compare` which must return
    /// a number whose sign gives the ordering.
    pub(crate) fn compare_op(&mut self, lhs: &Value, rhs: &Value) -> Result<Ordering> {
        let err = match compare(lhs, rhs) {
            Ok(ordering) => return Ok(ordering),
            Err(err) => err,
        };

        let Some(method) = meta_method(lhs, MetaMethod::Compare) else {
            return Err(err);
        };
        let result = self.call_value(&method, &[lhs.clone(), rhs.clone()])?;
        let sign = result.to_float()?;
        Ok(sign.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: ArithOp, lhs: impl Into<Value>, rhs: impl Into<Value>) -> Result<Value> {
        arith(op, &lhs.into(), &rhs.into()).map(|v| v.unwrap_or(Value::Null))
    }

    fn code(result: Result<Value>) -> ErrorCode {
        result.unwrap_err().code
    }

    #[test]
    fn integers_stay_integers() {
        assert_eq!(eval(ArithOp::Add, 2, 3).unwrap(), Value::Integer(5));
        assert_eq!(eval(ArithOp::Sub, 2, 3).unwrap(), Value::Integer(-1));
        assert_eq!(eval(ArithOp::Div, 7, 2).unwrap(), Value::Integer(3));
        assert_eq!(eval(ArithOp::Mod, -7, 3).unwrap(), Value::Integer(-1));
        assert_eq!(eval(ArithOp::Exp, 2, 10).unwrap(), Value::Integer(1024));
        assert_eq!(eval(ArithOp::Add, i64::MAX, 1).unwrap(), Value::Integer(i64::MIN));
    }

    #[test]
    fn mixed_operands_promote_to_float() {
        assert_eq!(eval(ArithOp::Add, 2, 3.0).unwrap(), Value::Float(5.0));
        assert_eq!(eval(ArithOp::Mul, 1.5, 2).unwrap(), Value::Float(3.0));
        assert_eq!(eval(ArithOp::Mod, 7.5, 2).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn bools_promote_to_integers() {
        assert_eq!(eval(ArithOp::Add, true, true).unwrap(), Value::Integer(2));
        assert_eq!(eval(ArithOp::Mul, false, 10).unwrap(), Value::Integer(0));
    }

    #[test]
    fn zero_divisors() {
        assert_eq!(code(eval(ArithOp::Div, 1, 0)), ErrorCode::ZeroDivision);
        assert_eq!(code(eval(ArithOp::Div, 1.0, 0)), ErrorCode::ZeroDivision);
        assert_eq!(code(eval(ArithOp::Mod, 1, 0)), ErrorCode::ZeroModulus);
        assert_eq!(code(eval(ArithOp::Mod, 1, 0.0)), ErrorCode::ZeroModulus);
        assert_eq!(code(eval(ArithOp::Mod, 5, 1.5)), ErrorCode::InvalidModulus);
    }

    #[test]
    fn negative_exponent_truncates() {
        assert_eq!(eval(ArithOp::Exp, 2, -1).unwrap(), Value::Integer(0));
        assert_eq!(eval(ArithOp::Exp, 1, -3).unwrap(), Value::Integer(1));
        assert_eq!(eval(ArithOp::Exp, 2.0, -1).unwrap(), Value::Float(0.5));
    }

    #[test]
    fn bitwise_and_shifts() {
        assert_eq!(eval(ArithOp::BitOr, 0b100, 0b001).unwrap(), Value::Integer(0b101));
        assert_eq!(eval(ArithOp::BitAnd, 6.0, 3).unwrap(), Value::Integer(2));
        assert_eq!(eval(ArithOp::LShift, 1, 4).unwrap(), Value::Integer(16));
        assert_eq!(eval(ArithOp::RShift, -16, 2).unwrap(), Value::Integer(-4));
        assert_eq!(code(eval(ArithOp::LShift, 1, 64)), ErrorCode::InvalidOperation);
        assert_eq!(code(eval(ArithOp::RShift, 1, -1)), ErrorCode::InvalidOperation);
        assert_eq!(code(eval(ArithOp::BitXor, 1.5, 1)), ErrorCode::InvalidOperation);
    }

    #[test]
    fn non_numeric_defers() {
        assert!(arith(ArithOp::Add, &Value::string_view("a"), &Value::from(1)).unwrap().is_none());
        assert!(arith(ArithOp::Add, &Value::Null, &Value::Null).unwrap().is_none());
    }
}
