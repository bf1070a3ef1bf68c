use thiserror::Error;

use crate::protocol::LOGGED_OUT_ERROR_CODE;

/// Failure to turn a raw backend body into a usable response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("could not find start of response")]
    MissingPayload,
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("(probably) logged out: server returned the logged-out error code")]
    LoggedOut,
    #[error("unknown error {code} from server")]
    Server { code: i64 },
}

/// Map the integer `error` field carried by every backend response.
pub fn classify_error_code(code: i64) -> Result<(), ResponseError> {
    match code {
        LOGGED_OUT_ERROR_CODE => Err(ResponseError::LoggedOut),
        code if code > 0 => Err(ResponseError::Server { code }),
        _ => Ok(()),
    }
}
