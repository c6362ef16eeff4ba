use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabClientError {
    #[error("HTTP error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Authentication failed with status {status}")]
    Authentication { status: u16 },

    #[error("Request to lab controller failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response from lab controller: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Client for {0} has been closed")]
    Closed(String),
}

impl LabClientError {
    /// True when the controller rejected the credentials or the token.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            LabClientError::Authentication { .. } => true,
            LabClientError::Status { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}
