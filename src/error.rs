use std::fmt;

/// Structured acknowledgement errors from the realtime channel.
/// These indicate a misconfiguration, not a transient fault, and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    TooManyConnections,
    NotAuthorized,
}

impl SubscriptionError {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "tooManyConnections" => Some(SubscriptionError::TooManyConnections),
            "notAuthorized" => Some(SubscriptionError::NotAuthorized),
            _ => None,
        }
    }

    pub fn as_id(&self) -> &'static str {
        match self {
            SubscriptionError::TooManyConnections => "tooManyConnections",
            SubscriptionError::NotAuthorized => "notAuthorized",
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    /// Login failed, or both token-recovery paths (refresh, re-login) failed.
    Auth(String),
    /// Non-2xx, non-401 REST response, with the vendor error payload when present.
    Api {
        status: u16,
        body: Option<serde_json::Value>,
    },
    Subscription(SubscriptionError),
    /// Transport-level realtime failure; retried up to the reconnect ceiling.
    Connection(String),
    /// A vendor numeric code with no entry in the lookup tables.
    UnknownCode { kind: &'static str, code: i64 },
    /// A response that does not match the expected typed record.
    Malformed {
        context: &'static str,
        reason: String,
    },
    /// The realtime dispatch task is gone (shut down or crashed).
    ListenerClosed,
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Auth(reason) => write!(f, "authentication failed: {reason}"),
            Error::Api { status, body } => match body {
                Some(body) => write!(f, "API error {status}: {body}"),
                None => write!(f, "API error {status}"),
            },
            Error::Subscription(e) => write!(f, "subscription rejected: {}", e.as_id()),
            Error::Connection(reason) => write!(f, "connection error: {reason}"),
            Error::UnknownCode { kind, code } => write!(f, "unknown {kind} code: {code}"),
            Error::Malformed { context, reason } => {
                write!(f, "malformed response in {context}: {reason}")
            }
            Error::ListenerClosed => write!(f, "event listener is not running"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
