//! Error types for stanza correlation and request handling.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,

    #[error("interrupted while waiting for the connection")]
    InterruptedWait,

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StanzaCodecError {
    #[error("stanza parse failed: {0}")]
    ParseFailed(String),

    #[error("unsupported stanza element <{0}/>")]
    Unsupported(String),

    #[error("<{element}/> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("<{element}/> has invalid '{attribute}' value '{value}'")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },

    #[error("failed to serialize <{element}/> stanza: {message}")]
    SerializeFailed {
        element: &'static str,
        message: String,
    },
}

/// Outcome of a wait on a single collector.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectorError {
    #[error("no matching stanza within {waited:?}")]
    Timeout { waited: Duration },

    #[error("collector was canceled")]
    Canceled,
}

/// Errors surfaced to callers of request/response and multi-stage exchanges.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    /// No matching stanza arrived before the (inactivity) timeout elapsed.
    #[error("no response within {waited:?}")]
    Timeout { waited: Duration },

    /// The wait was canceled, usually because the connection was closed.
    #[error("exchange canceled")]
    Canceled,

    #[error("connection failure: {0}")]
    Connection(#[from] ConnectionError),

    /// The peer answered with an IQ of type `error`.
    #[error("peer returned stanza error: {condition}")]
    Stanza {
        condition: StanzaErrorCondition,
        error_type: StanzaErrorType,
        text: Option<String>,
    },

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<CollectorError> for ExchangeError {
    fn from(error: CollectorError) -> Self {
        match error {
            CollectorError::Timeout { waited } => Self::Timeout { waited },
            CollectorError::Canceled => Self::Canceled,
        }
    }
}

impl ExchangeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors a request handler may return instead of a reply.
///
/// The dispatcher converts each variant into an IQ error reply, so a failing
/// handler never takes down the reading path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestHandlerError {
    /// Nobody registered is able to answer the request.
    #[error("capability not found: {0}")]
    CapabilityNotFound(String),

    /// No handler is registered for the request's payload at all.
    #[error("no handler registered for {0}")]
    NoHandler(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RequestHandlerError {
    pub fn capability_not_found(msg: impl Into<String>) -> Self {
        Self::CapabilityNotFound(msg.into())
    }

    pub fn no_handler(msg: impl Into<String>) -> Self {
        Self::NoHandler(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Condition and type carried by the IQ error reply for this error.
    pub fn condition(&self) -> (StanzaErrorCondition, StanzaErrorType) {
        match self {
            Self::CapabilityNotFound(_) => {
                (StanzaErrorCondition::ItemNotFound, StanzaErrorType::Cancel)
            }
            Self::NoHandler(_) => (
                StanzaErrorCondition::ServiceUnavailable,
                StanzaErrorType::Cancel,
            ),
            Self::NotImplemented(_) => (
                StanzaErrorCondition::FeatureNotImplemented,
                StanzaErrorType::Cancel,
            ),
            Self::BadRequest(_) => (StanzaErrorCondition::BadRequest, StanzaErrorType::Modify),
            Self::Internal(_) => (
                StanzaErrorCondition::InternalServerError,
                StanzaErrorType::Wait,
            ),
        }
    }
}

/// XMPP stanza error conditions (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    BadRequest,
    Conflict,
    FeatureNotImplemented,
    Forbidden,
    InternalServerError,
    ItemNotFound,
    NotAllowed,
    NotAuthorized,
    RecipientUnavailable,
    RemoteServerTimeout,
    ServiceUnavailable,
    UndefinedCondition,
    UnexpectedRequest,
}

impl StanzaErrorCondition {
    const ALL: [Self; 13] = [
        Self::BadRequest,
        Self::Conflict,
        Self::FeatureNotImplemented,
        Self::Forbidden,
        Self::InternalServerError,
        Self::ItemNotFound,
        Self::NotAllowed,
        Self::NotAuthorized,
        Self::RecipientUnavailable,
        Self::RemoteServerTimeout,
        Self::ServiceUnavailable,
        Self::UndefinedCondition,
        Self::UnexpectedRequest,
    ];

    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::Forbidden => "forbidden",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::RecipientUnavailable => "recipient-unavailable",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ServiceUnavailable => "service-unavailable",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnexpectedRequest => "unexpected-request",
        }
    }

    /// Parse a condition element name. Unknown names map to
    /// `UndefinedCondition`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|condition| condition.as_str() == name)
            .unwrap_or(Self::UndefinedCondition)
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// XMPP stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auth" => Some(Self::Auth),
            "cancel" => Some(Self::Cancel),
            "modify" => Some(Self::Modify),
            "wait" => Some(Self::Wait),
            _ => None,
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_errors_map_to_reply_conditions() {
        assert_eq!(
            RequestHandlerError::capability_not_found("no thing").condition(),
            (StanzaErrorCondition::ItemNotFound, StanzaErrorType::Cancel)
        );
        assert_eq!(
            RequestHandlerError::not_implemented("non-momentary").condition(),
            (
                StanzaErrorCondition::FeatureNotImplemented,
                StanzaErrorType::Cancel
            )
        );
        assert_eq!(
            RequestHandlerError::no_handler("<ping/>").condition(),
            (
                StanzaErrorCondition::ServiceUnavailable,
                StanzaErrorType::Cancel
            )
        );
        assert_eq!(
            RequestHandlerError::internal("boom").condition().0,
            StanzaErrorCondition::InternalServerError
        );
    }

    #[test]
    fn condition_names_round_trip_and_unknown_is_undefined() {
        for condition in StanzaErrorCondition::ALL {
            assert_eq!(StanzaErrorCondition::from_name(condition.as_str()), condition);
        }
        assert_eq!(
            StanzaErrorCondition::from_name("gone"),
            StanzaErrorCondition::UndefinedCondition
        );
    }

    #[test]
    fn collector_errors_convert_to_exchange_errors() {
        let waited = Duration::from_secs(5);
        let error: ExchangeError = CollectorError::Timeout { waited }.into();
        assert!(error.is_timeout());
        assert_eq!(ExchangeError::from(CollectorError::Canceled), ExchangeError::Canceled);
    }
}
