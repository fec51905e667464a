use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Client-side payload problem; answered with a 400 and no state change.
    #[error("{0}")]
    BadRequest(String),
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to render history csv: {0}")]
    Csv(#[from] csv::Error),
}

impl SimulatorError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}
