//! RPC Error Types
//!
//! Maps engine errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use linkward_core::EngineError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const SYSTEM_ERROR: i32 = 5002;
}

/// Convert EngineError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: EngineError) -> ErrorObjectOwned {
    match err {
        EngineError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        EngineError::Domain(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        EngineError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        EngineError::Storage(e) => ErrorObjectOwned::owned(code::DB_ERROR, e.to_string(), None::<()>),
        EngineError::Channel(e) => {
            ErrorObjectOwned::owned(code::SYSTEM_ERROR, e.to_string(), None::<()>)
        }
        EngineError::Stage(e) => {
            ErrorObjectOwned::owned(code::SYSTEM_ERROR, e.to_string(), None::<()>)
        }
        EngineError::InvalidState(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        EngineError::Internal(msg) => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>)
        }
    }
}

/// A structured command failure becomes a CONFLICT: the request was valid
/// but the job state does not allow it
pub fn command_rejected(message: String) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code::CONFLICT, message, None::<()>)
}

pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}
