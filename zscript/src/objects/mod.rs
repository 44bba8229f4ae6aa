mod array;
mod class;
mod closure;
mod native_array;
mod node;
pub(crate) mod strings;
mod structs;
mod table;
mod user_data;

pub use array::Array;
pub use class::{Class, Instance, MemberMap};
pub use closure::{
    Capture, CaptureInfo, CaptureSource, Closure, FunctionPrototype, NativeClosure,
    NativeClosureFn,
};
pub use native_array::{NativeArray, NativeArrayType};
pub use node::Node;
pub use strings::{LongString, MutableString, SMALL_STRING_CAPACITY, SmallString};
pub use structs::{Struct, StructInstance, StructMember};
pub use table::{EnumState, Table, TableMap};
pub use user_data::UserData;

pub(crate) use class::MAX_CLASS_CHAIN;
