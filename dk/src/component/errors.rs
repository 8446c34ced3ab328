//! Component errors and user-facing failure messages

use thiserror::Error;

use crate::api::ApiError;
use crate::dom::DomError;

/// Errors raised synchronously when mounting a component
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("Container element not found: {0}")]
    MissingContainer(String),

    #[error("Invalid component options: {0}")]
    InvalidOptions(String),

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),
}

pub const MSG_UNAUTHORIZED: &str = "Your session has expired. Please log in again.";
pub const MSG_FORBIDDEN: &str = "You do not have permission to perform this action.";
pub const MSG_NOT_FOUND: &str = "The requested resource could not be found.";
pub const MSG_TIMEOUT: &str = "The request timed out. Please try again.";
pub const MSG_RATE_LIMITED: &str = "Too many requests. Please wait a moment and try again.";
pub const MSG_SERVER: &str = "The server encountered an error. Please try again later.";
pub const MSG_UNAVAILABLE: &str = "The service is temporarily unavailable. Please try again later.";
pub const MSG_NETWORK: &str = "Network error. Please check your connection and try again.";
pub const MSG_PARSE: &str = "The server sent an unexpected response. Please try again.";
pub const MSG_GENERIC: &str = "Something went wrong. Please try again.";

/// Sentence shown to the user for a failed API call
///
/// Known statuses map to fixed sentences; otherwise the message text is
/// matched for network and parse failures; anything else gets the generic
/// retry message.
pub fn error_message(error: &ApiError) -> &'static str {
    match error.status {
        Some(401) => MSG_UNAUTHORIZED,
        Some(403) => MSG_FORBIDDEN,
        Some(404) => MSG_NOT_FOUND,
        Some(408) => MSG_TIMEOUT,
        Some(429) => MSG_RATE_LIMITED,
        Some(500) => MSG_SERVER,
        Some(503) => MSG_UNAVAILABLE,
        _ => message_for_text(&error.message),
    }
}

/// Sentence for any lifecycle failure; API errors anywhere in the chain win
pub fn describe_error(report: &eyre::Report) -> &'static str {
    match report.chain().find_map(|e| e.downcast_ref::<ApiError>()) {
        Some(api) => error_message(api),
        None => message_for_text(&format!("{:#}", report)),
    }
}

fn message_for_text(text: &str) -> &'static str {
    let text = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["network", "failed to fetch", "connection", "offline", "unreachable"]) {
        MSG_NETWORK
    } else if has(&["json", "parse", "unexpected token", "invalid response"]) {
        MSG_PARSE
    } else if has(&["timed out", "timeout"]) {
        MSG_TIMEOUT
    } else {
        MSG_GENERIC
    }
}
