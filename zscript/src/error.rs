//! Error codes and the result wrappers shared by the runtime and the host.
//!
//! Every failure in the runtime maps onto one [`ErrorCode`]. The idiomatic
//! carrier is [`Error`] (code plus a best-effort message) inside
//! [`Result`]. The host-facing wrappers [`Status`], [`ErrorResult`] and
//! [`OptionalResult`] share the same code space with opposite polarities.

use std::{borrow::Cow, fmt};

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Closed set of status codes.
///
/// `Success` and `Returned` are the only valid codes. `Returned` is not a
/// failure: it marks a frame that finished through a `return` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    Returned,
    Unknown,
    Invalid,
    InvalidSize,
    InvalidType,
    InvalidOperation,
    InvalidToken,
    InvalidComma,
    InvalidDirectory,
    InvalidValueTypeAssignment,
    InvalidIncludeSyntax,
    InvalidIncludeFile,
    InvalidArgument,
    InvalidParameterCount,
    InvalidParameterType,
    InvalidNativeFunctionCall,
    InvalidName,
    InvalidIncludeDirectory,
    InvalidNativeArrayType,
    AlreadyExists,
    ConversionError,
    OpenFileError,
    MemoryError,
    NullType,
    OutOfBounds,
    OutOfMemory,
    Inaccessible,
    Unimplemented,
    NotATable,
    NotAForColon,
    IdentifierExpected,
    TooManyLocals,
    DuplicatedModule,
    StackError,
    NotFound,
    CantModifyExportTable,
    CantModifyConstMember,
    CantModifyStaticConst,
    ZeroDivision,
    ZeroModulus,
    InvalidModulus,
    NameExists,
}

impl ErrorCode {
    pub const COUNT: usize = ErrorCode::NameExists as usize + 1;

    /// Fixed string name of the code.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Returned => "returned",
            Self::Unknown => "unknown",
            Self::Invalid => "invalid",
            Self::InvalidSize => "invalid_size",
            Self::InvalidType => "invalid_type",
            Self::InvalidOperation => "invalid_operation",
            Self::InvalidToken => "invalid_token",
            Self::InvalidComma => "invalid_comma",
            Self::InvalidDirectory => "invalid_directory",
            Self::InvalidValueTypeAssignment => "invalid_value_type_assignment",
            Self::InvalidIncludeSyntax => "invalid_include_syntax",
            Self::InvalidIncludeFile => "invalid_include_file",
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidParameterCount => "invalid_parameter_count",
            Self::InvalidParameterType => "invalid_parameter_type",
            Self::InvalidNativeFunctionCall => "invalid_native_function_call",
            Self::InvalidName => "invalid_name",
            Self::InvalidIncludeDirectory => "invalid_include_directory",
            Self::InvalidNativeArrayType => "invalid_native_array_type",
            Self::AlreadyExists => "already_exists",
            Self::ConversionError => "conversion_error",
            Self::OpenFileError => "open_file_error",
            Self::MemoryError => "memory_error",
            Self::NullType => "null_type",
            Self::OutOfBounds => "out_of_bounds",
            Self::OutOfMemory => "out_of_memory",
            Self::Inaccessible => "inaccessible",
            Self::Unimplemented => "unimplemented",
            Self::NotATable => "not_a_table",
            Self::NotAForColon => "not_a_for_colon",
            Self::IdentifierExpected => "identifier_expected",
            Self::TooManyLocals => "too_many_locals",
            Self::DuplicatedModule => "duplicated_module",
            Self::StackError => "stack_error",
            Self::NotFound => "not_found",
            Self::CantModifyExportTable => "cant_modify_export_table",
            Self::CantModifyConstMember => "cant_modify_const_member",
            Self::CantModifyStaticConst => "cant_modify_static_const",
            Self::ZeroDivision => "zero_division",
            Self::ZeroModulus => "zero_modulus",
            Self::InvalidModulus => "invalid_modulus",
            Self::NameExists => "name_exists",
        }
    }

    /// `Success` and `Returned` are valid, everything else is a failure.
    #[inline]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Success | Self::Returned)
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        !self.is_valid()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure code together with a best-effort message for the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{}", .code, message_suffix(.message))]
pub struct Error {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        debug_assert!(code.is_error(), "{code} is not a failure code");
        Self {
            code,
            message: message.into(),
        }
    }

    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self {
            code,
            message: Cow::Borrowed(""),
        }
    }
}

/// Success-polarity wrapper: [`Status::is_ok`] holds for valid codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(ErrorCode);

impl Status {
    pub const SUCCESS: Self = Self(ErrorCode::Success);
    pub const RETURNED: Self = Self(ErrorCode::Returned);

    pub const fn new(code: ErrorCode) -> Self {
        Self(code)
    }

    pub const fn code(self) -> ErrorCode {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0.is_valid()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_ok() { Ok(()) } else { Err(self.0.into()) }
    }
}

/// Failure-polarity wrapper: [`ErrorResult::is_err`] holds for failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResult(ErrorCode);

impl ErrorResult {
    pub const OK: Self = Self(ErrorCode::Success);

    pub const fn new(code: ErrorCode) -> Self {
        Self(code)
    }

    pub const fn code(self) -> ErrorCode {
        self.0
    }

    pub const fn is_err(self) -> bool {
        self.0.is_error()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_err() { Err(self.0.into()) } else { Ok(()) }
    }
}

impl From<Status> for ErrorResult {
    fn from(status: Status) -> Self {
        Self(status.code())
    }
}

impl From<ErrorResult> for Status {
    fn from(err: ErrorResult) -> Self {
        Self(err.code())
    }
}

impl<T> From<&Result<T>> for ErrorResult {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::OK,
            Err(err) => Self(err.code),
        }
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        ErrorResult::from(result).into()
    }
}

/// A produced value plus a code.
///
/// Valid only when a value is present and the code is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionalResult<T> {
    value: Option<T>,
    code: ErrorCode,
}

impl<T> OptionalResult<T> {
    pub fn some(value: T) -> Self {
        Self {
            value: Some(value),
            code: ErrorCode::Success,
        }
    }

    pub fn error(code: ErrorCode) -> Self {
        Self { value: None, code }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some() && self.code.is_valid()
    }

    pub fn value(&self) -> Option<&T> {
        if self.code.is_valid() { self.value.as_ref() } else { None }
    }

    pub fn into_result(self) -> Result<T> {
        match self.value {
            Some(value) if self.code.is_valid() => Ok(value),
            Some(_) => Err(self.code.into()),
            None if self.code.is_error() => Err(self.code.into()),
            None => Err(ErrorCode::NotFound.into()),
        }
    }
}

impl<T> From<Result<T>> for OptionalResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::some(value),
            Err(err) => Self::error(err.code),
        }
    }
}

macro_rules! bail {
    ($code:expr) => {
        return Err($crate::Error::from($code))
    };
    ($code:expr, $($arg:tt)+) => {
        return Err($crate::Error::new($code, format!($($arg)+)))
    };
}

pub(crate) use bail;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_returned_are_valid() {
        assert!(ErrorCode::Success.is_valid());
        assert!(ErrorCode::Returned.is_valid());
        assert!(ErrorCode::NotFound.is_error());
        assert_eq!(ErrorCode::Success as u16, 0);
    }

    #[test]
    fn names_are_fixed() {
        assert_eq!(ErrorCode::ZeroDivision.name(), "zero_division");
        assert_eq!(ErrorCode::InvalidValueTypeAssignment.to_string(), "invalid_value_type_assignment");
        assert_eq!(ErrorCode::NameExists.name(), "name_exists");
        assert_eq!(ErrorCode::COUNT, 43);
    }

    #[test]
    fn codes_round_trip_through_u16() {
        for raw in 0..ErrorCode::COUNT as u16 {
            let code = ErrorCode::try_from(raw).expect("contiguous codes");
            assert_eq!(u16::from(code), raw);
        }
        assert!(ErrorCode::try_from(ErrorCode::COUNT as u16).is_err());
    }

    #[test]
    fn wrappers_invert_polarity() {
        let ok = Status::new(ErrorCode::Success);
        let returned = Status::RETURNED;
        let failed = Status::new(ErrorCode::OutOfBounds);
        assert!(ok.is_ok());
        assert!(returned.is_ok());
        assert!(!failed.is_ok());

        assert!(!ErrorResult::from(ok).is_err());
        assert!(!ErrorResult::from(returned).is_err());
        assert!(ErrorResult::from(failed).is_err());
        assert_eq!(failed.into_result().unwrap_err().code, ErrorCode::OutOfBounds);
    }

    #[test]
    fn optional_requires_value_and_valid_code() {
        let some = OptionalResult::some(3);
        assert!(some.is_valid());
        assert_eq!(some.value(), Some(&3));

        let missing: OptionalResult<i32> = OptionalResult::error(ErrorCode::NotFound);
        assert!(!missing.is_valid());
        assert!(!missing.has_value());
        assert_eq!(missing.into_result().unwrap_err().code, ErrorCode::NotFound);

        let from_err: OptionalResult<i32> = Err(Error::from(ErrorCode::InvalidType)).into();
        assert_eq!(from_err.code(), ErrorCode::InvalidType);
    }

    #[test]
    fn error_display_includes_message() {
        let err = Error::new(ErrorCode::NotFound, "key 'x'");
        assert_eq!(err.to_string(), "not_found: key 'x'");
        assert_eq!(Error::from(ErrorCode::NullType).to_string(), "null_type");
    }
}
