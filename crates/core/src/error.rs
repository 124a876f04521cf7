use crate::models::DocumentRole;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("{0} returned an empty response")]
    EmptyResponse(String),
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot extract text from {role} document {path}: {details}")]
    Extraction {
        role: DocumentRole,
        path: String,
        details: String,
    },

    #[error("index build failed: {0}")]
    IndexBuild(#[source] CapabilityError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] CapabilityError),

    #[error("report generation failed: {0}")]
    Generation(#[source] CapabilityError),

    #[error("invalid audit config: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = AuditError> = std::result::Result<T, E>;
