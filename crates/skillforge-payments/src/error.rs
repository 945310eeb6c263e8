#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("caller is not authenticated")]
    Unauthenticated,

    #[error("signature verification failed")]
    Signature,

    #[error("order metadata not found")]
    MetadataMissing,

    #[error("payment is not in a successful state: {0}")]
    NotCaptured(String),

    #[error("payment gateway request failed")]
    Upstream(#[source] anyhow::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
