// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// Scheduler error codes. These are the values carried in acknowledgements and responses sent back to the task
/// scheduler, so their numeric values are stable.
#[repr(i32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    Ok = 0,
    ParameterInvalid = 21000,
    DriverError = 21001,
    KernelNotFound = 21002,
    NotFoundEvent = 21003,
    KernelFailed = 21004,
    InitFailed = 21005,
    ModelNotFound = 21006,
    ModelExists = 21007,
    StreamNotFound = 21008,
    TaskIndexInvalid = 21009,
    ModelStatusNotAllowOperate = 21010,
    DumpFailed = 21011,
    ProcessExit = 21012,
    RunInIllegalCpu = 21013,
    Timeout = 21014,
    Canceled = 21015,
    Io = 21016,
}

/// Failure
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub code: ErrorCode,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(code: ErrorCode, cause: &str) -> Self {
        Self {
            code,
            cause: cause.to_string(),
        }
    }

    /// Returns the raw status code of the target failure.
    pub fn status(&self) -> i32 {
        self.code.into()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.code, self.cause)
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?} ({}): {:?}", self.code, self.status(), self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self {
            code: ErrorCode::Io,
            cause: format!("I/O error: {}", e),
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
