// src/rabbitmq/errors.rs

use lapin::protocol::{AMQPErrorKind, AMQPHardError, AMQPSoftError};
use lapin::Error as LapinError;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Error taxonomy shared by the connection manager, the publish path and the
/// consume loop. Every transport error is classified into one of these
/// variants at the transport boundary, so callers only switch on the tag.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Broker refused authentication: {0}")]
    Auth(String),

    #[error("RabbitMQ connection error: {0}")]
    Connection(String),

    #[error("RabbitMQ channel state error: {0}")]
    ChannelState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Client is closed")]
    Closed,

    #[error("Unknown error: {0}")]
    Other(String),
}

/// Custom Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Whether the connect loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::Auth(_) | ClientError::Config(_))
    }

    pub fn is_connection_fault(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }

    pub fn is_channel_fault(&self) -> bool {
        matches!(self, ClientError::ChannelState(_))
    }
}

// Converting from lapin errors
impl From<LapinError> for ClientError {
    fn from(error: LapinError) -> Self {
        let error_text = error.to_string();

        match error {
            LapinError::InvalidChannel(_) | LapinError::InvalidChannelState(_) => {
                ClientError::ChannelState(error_text)
            }
            LapinError::InvalidConnectionState(_)
            | LapinError::IOError(_)
            | LapinError::MissingHeartbeatError => classify_text(error_text, ClientError::Connection),
            LapinError::ProtocolError(ref amqp_error) => match amqp_error.kind() {
                AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED) => ClientError::Auth(error_text),
                AMQPErrorKind::Hard(AMQPHardError::NOTALLOWED)
                    if is_vhost_refusal(amqp_error.get_message().as_str()) =>
                {
                    ClientError::Auth(error_text)
                }
                AMQPErrorKind::Hard(_) => classify_text(error_text, ClientError::Connection),
                AMQPErrorKind::Soft(_) => classify_text(error_text, ClientError::Other),
            },
            _ => classify_text(error_text, ClientError::Other),
        }
    }
}

impl From<Elapsed> for ClientError {
    fn from(_: Elapsed) -> Self {
        ClientError::Connection("Connection attempt timed out".to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(error: std::io::Error) -> Self {
        ClientError::Connection(error.to_string())
    }
}

/// Authentication failures surface from the broker in several shapes (a
/// connection.close with ACCESS_REFUSED, a login failure message), so they are
/// recognised by their text before falling back to the structural class.
fn classify_text(error_text: String, fallback: fn(String) -> ClientError) -> ClientError {
    if is_auth_failure(&error_text) {
        ClientError::Auth(error_text)
    } else {
        fallback(error_text)
    }
}

pub(crate) fn is_auth_failure(error_text: &str) -> bool {
    let text = error_text.to_ascii_lowercase();
    text.contains("access_refused")
        || text.contains("accessrefused")
        || text.contains("access refused")
        || text.contains("authentication")
        || text.contains("login was refused")
}

// 530 NOT_ALLOWED is also used for other limits; only a refused vhost is a
// permission problem.
fn is_vhost_refusal(reply_text: &str) -> bool {
    let text = reply_text.to_ascii_lowercase();
    text.contains("vhost") && text.contains("refused")
}
