//! Error types shared by the relay server, consumer and collaborators

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error types for relay operations
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No file uploaded.")]
    NoFile,

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Invalid parameter {name}: {value:?}")]
    InvalidParameter { name: &'static str, value: String },

    /// The progress channel broke or closed before its terminal event.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed stream event: {0}")]
    Decode(#[from] serde_json::Error),

    /// The server refused the request before any job was started.
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl RelayError {
    /// True for errors caused by the request itself rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::NoFile | RelayError::InvalidUpload(_) | RelayError::InvalidParameter { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(RelayError::NoFile.is_client_error());
        assert!(RelayError::InvalidParameter { name: "gap", value: "x".into() }.is_client_error());
        assert!(!RelayError::Transport("closed".into()).is_client_error());
    }

    #[test]
    fn test_no_file_message() {
        assert_eq!(RelayError::NoFile.to_string(), "No file uploaded.");
    }
}
