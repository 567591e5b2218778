// Dispatch error kinds.
//
// The worker persists the Display text of the last error, so each message
// names its kind ("transport error", "messaging window expired", "API error").

use thiserror::Error;

/// Platform error code for "(#10) This message is sent outside of allowed window."
pub const WINDOW_EXPIRED_CODE: i64 = 10;

/// Subcode that pins code 10 to the messaging-window condition.
pub const WINDOW_EXPIRED_SUBCODE: i64 = 2534022;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Network-level failure: timeout, refused connection, DNS.
    #[error("transport error: {0}")]
    Transport(String),

    /// The recipient's messaging window is closed. Retrying cannot help.
    #[error("messaging window expired (status {status}): {message}")]
    WindowExpired { status: u16, message: String },

    /// Any other non-2xx response.
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

impl DispatchError {
    /// True for failures that will fail identically on retry.
    ///
    /// Window expiry and 4xx responses other than 408/429 are terminal;
    /// transport errors, 408, 429 and 5xx are transient.
    pub fn is_terminal(&self) -> bool {
        match self {
            DispatchError::Transport(_) => false,
            DispatchError::WindowExpired { .. } => true,
            DispatchError::Api { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
        }
    }
}
