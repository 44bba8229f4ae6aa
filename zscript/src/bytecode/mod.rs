mod builder;
mod cursor;
mod decoder;
mod encoder;
mod instruction;
mod op;

pub use builder::{BytecodeBuilder, Label};
pub use cursor::InstructionCursor;
pub use decoder::{BytecodeDecoder, decode_all};
pub use encoder::{BytecodeEncoder, encode_all};
pub use instruction::{CompareOp, GetFlags, Instruction, Reg};
pub use op::Op;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{ErrorCode, ObjectType, SmallString, TypeMask, VarDeclFlags};

    #[test]
    fn round_trip_every_operand_shape() {
        let code = vec![
            Instruction::Line { line: 0xDEAD_BEEF },
            Instruction::Load { target: 1, idx: 70_000 },
            Instruction::LoadInt {
                target: 2,
                value: i64::MIN,
            },
            Instruction::LoadFloat {
                target: 3,
                value: -1.5,
            },
            Instruction::LoadBool {
                target: 4,
                value: true,
            },
            Instruction::LoadSmallString {
                target: 5,
                value: SmallString::new("hello").unwrap(),
            },
            Instruction::LoadNulls { target: 6, count: 3 },
            Instruction::Get {
                target: 0,
                table: 1,
                key: 2,
                flags: GetFlags::LOOK_IN_ROOT,
            },
            Instruction::SetCapture { idx: 9, src: 4 },
            Instruction::BitwiseXor {
                target: 1,
                lhs: 2,
                rhs: 3,
            },
            Instruction::ModEq { target: 1, rhs: 2 },
            Instruction::Cmp {
                target: 0,
                op: CompareOp::Tw,
                lhs: 1,
                rhs: 2,
            },
            Instruction::IfNull {
                target: 0,
                src: 1,
                offset: -7,
            },
            Instruction::PObjIncr {
                target: 0,
                table: 1,
                key: 2,
                is_incr: false,
            },
            Instruction::Call {
                target: 0,
                callee: 1,
                n_params: 3,
                stack_base: 2,
            },
            Instruction::NewObj {
                target: 0,
                kind: ObjectType::Struct,
            },
            Instruction::NewStructSlot {
                strct: 0,
                key: 1,
                value: 2,
                has_value: true,
                mask: TypeMask::NUMBER,
                flags: VarDeclFlags::CONST | VarDeclFlags::STATIC,
            },
            Instruction::CheckTypeMask {
                src: 3,
                mask: TypeMask::STRING,
            },
            Instruction::Return {
                src: 0,
                has_value: true,
            },
        ];

        let bytes = encode_all(&code);
        assert_eq!(decode_all(&bytes).unwrap(), code);
    }

    #[test]
    fn forward_and_backward_jumps() {
        let mut b = BytecodeBuilder::new();
        b.load_int(0, 0);
        let top = b.current_index();
        let exit = b.jump_if_zero(0);
        b.load_int(1, 1);
        b.jump_back(top);
        b.bind(exit);
        b.ret_null();

        assert_eq!(b.finish(), vec![
            Instruction::LoadInt { target: 0, value: 0 },
            Instruction::Jz { src: 0, offset: 3 },
            Instruction::LoadInt { target: 1, value: 1 },
            Instruction::Jmp { offset: -2 },
            Instruction::Return {
                src: 0,
                has_value: false,
            },
        ]);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(decode_all(&[0xFF]).unwrap_err().code, ErrorCode::Invalid);

        let mut bytes = encode_all(&[Instruction::LoadInt { target: 0, value: 5 }]);
        bytes.pop();
        assert_eq!(decode_all(&bytes).unwrap_err().code, ErrorCode::Invalid);
    }

    #[test]
    fn cursor_bounds() {
        let code = [Instruction::Jmp { offset: 1 }, Instruction::LoadNull { target: 0 }];
        let mut cursor = InstructionCursor::new(&code);
        cursor.jump(2).unwrap();
        assert!(cursor.is_at_end());
        assert_eq!(cursor.jump(1).unwrap_err().code, ErrorCode::OutOfBounds);
        cursor.jump(-2).unwrap();
        assert_eq!(cursor.index(), 0);
        assert_eq!(cursor.jump(-1).unwrap_err().code, ErrorCode::OutOfBounds);
    }
}
