//! Error types for the command router.
//!
//! Only genuine failures live here. Content-level answers such as "no
//! relevant service" or the model declining to pick a command are modelled
//! as [`crate::router::QueryOutcome`] variants instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Malformed discovery reply on '{topic}': {reason}")]
    MalformedDiscoveryReply { topic: String, reason: String },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("LLM produced invalid response: {raw}")]
    InvalidModelOutput { raw: String },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Service {0} has no MQTT topic")]
    NoTransport(String),

    #[error("Timeout waiting for {service}.{command}")]
    ReplyTimeout { service: String, command: String },

    #[error("A reply is already pending on '{0}'")]
    ReplyInFlight(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serde(String),
}

pub type RouterResult<T> = Result<T, RouterError>;

impl From<std::io::Error> for RouterError {
    fn from(e: std::io::Error) -> Self {
        RouterError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(e: serde_json::Error) -> Self {
        RouterError::Serde(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_service_and_command() {
        let err = RouterError::ReplyTimeout {
            service: "ZmwSonosCtrl".to_string(),
            command: "ls_speakers".to_string(),
        };
        assert_eq!(err.to_string(), "Timeout waiting for ZmwSonosCtrl.ls_speakers");
    }

    #[test]
    fn json_errors_convert_to_serde_variant() {
        let err: RouterError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, RouterError::Serde(_)));
    }
}
