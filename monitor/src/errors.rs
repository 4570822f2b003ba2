use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error: status {status}, body: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("API error: {0}")]
    ApiSemantic(String),

    /// Token exchange failed. Callers should re-authenticate rather than retry.
    #[error("Authentication failed: status {status}, body: {body}")]
    Authentication { status: u16, body: String },

    #[error("Device query failed: status {status}, body: {body}")]
    DeviceQuery { status: u16, body: String },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the failure came from the upstream service rather than
    /// from local input or configuration.
    pub fn is_upstream(&self) -> bool {
        match self {
            Error::Transport(_)
            | Error::HttpStatus { .. }
            | Error::ApiSemantic(_)
            | Error::Authentication { .. }
            | Error::DeviceQuery { .. }
            | Error::Json(_) => true,
            Error::Signing(_) | Error::Config(_) | Error::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(Error::HttpStatus {
            status: 500,
            body: String::new()
        }
        .is_upstream());
        assert!(Error::ApiSemantic("bad".to_string()).is_upstream());
        assert!(!Error::Signing("no key".to_string()).is_upstream());
        assert!(!Error::Config("interval".to_string()).is_upstream());
    }

    #[test]
    fn test_authentication_message_carries_body() {
        let err = Error::Authentication {
            status: 401,
            body: r#"{"success":false}"#.to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("success"));
    }
}
