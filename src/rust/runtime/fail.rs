// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::crossbeam_channel::{
    SendError,
    TryRecvError,
};
use ::libc::{
    c_int,
    EBADMSG,
    EIO,
    ENOTCONN,
};
use ::std::{
    error,
    fmt,
    io,
};
use ::yaml_rust::ScanError;

//==============================================================================
// Structures
//==============================================================================

/// Failure
#[derive(Clone, PartialEq, Eq)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(_: io::Error) -> Self {
        Self {
            errno: EIO,
            cause: "I/O error".to_string(),
        }
    }
}

/// Conversion Trait Implementation for Malformed Configuration Files
impl From<ScanError> for Fail {
    fn from(e: ScanError) -> Self {
        Self {
            errno: EBADMSG,
            cause: format!("malformed configuration: {}", e),
        }
    }
}

/// Conversion Trait Implementation for Inter-Processor Link Send Failures
impl<T> From<SendError<T>> for Fail {
    fn from(_: SendError<T>) -> Self {
        Self {
            errno: ENOTCONN,
            cause: "inter-processor link is down".to_string(),
        }
    }
}

/// Conversion Trait Implementation for Inter-Processor Link Receive Failures
impl From<TryRecvError> for Fail {
    fn from(_: TryRecvError) -> Self {
        Self {
            errno: ENOTCONN,
            cause: "inter-processor link is down".to_string(),
        }
    }
}
