mod arithmetic;
pub mod bytecode;
mod compare;
mod engine;
mod error;
mod format;
mod interpreter;
mod lookup;
mod object_type;
mod objects;
mod rc;
pub mod serializer;
mod slots;
mod stack;
mod value;
mod vm;

pub use arithmetic::{ArithOp, arith};
pub use bytecode::{
    BytecodeBuilder, BytecodeDecoder, BytecodeEncoder, CompareOp, GetFlags, Instruction,
    InstructionCursor, Label, Op, Reg,
};
pub use compare::{Key, compare, equals, strict_equals};
pub use engine::{
    AllocTag, AllocateFn, AllocationStats, Engine, EngineCreateInfo, MAX_ALIGN, ReleaseHook,
    UserPointer, UserReleaseHook, default_allocate,
};
pub use error::{Error, ErrorCode, ErrorResult, OptionalResult, Result, Status};
pub use format::{SerializeFormat, Serialized};
pub use interpreter::ExecState;
pub use lookup::meta_method;
pub use object_type::{ExtensionKind, MetaMethod, ObjectType, TypeMask, VarDeclFlags};
pub use objects::*;
pub use rc::{Payload, RcHeader, Ref, WeakProxy};
pub use serializer::{SerializeFlags, from_binary, to_binary};
pub use value::{Extension, NativeFunction, NativePFunction, Value};
pub use vm::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_STACK_SIZE, Runtime, Vm, VmCreateInfo};

pub(crate) use objects::MAX_CLASS_CHAIN;
