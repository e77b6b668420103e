use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Every failure in the crate. Payloads are owned so the error is `Clone`:
/// a failed batch hands the same error to each of its waiting callers.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum Image360Error {
    #[error("invalid collection identifier: {0}")]
    #[diagnostic(help("expected `space:externalId`"))]
    InvalidIdentifier(String),

    #[error("invalid format version: {0}")]
    InvalidVersion(String),

    #[error("annotation data format error: {0}")]
    AnnotationFormat(String),

    #[error("invalid value for transformation property {property}: {value}")]
    InvalidProperty { property: String, value: String },

    #[error("unexpected response shape: {0}")]
    Schema(String),

    #[error("pagination cursor invariant violated: {0}")]
    CursorInvariant(String),

    #[error("graph query request failed: {0}")]
    BackendHttp(String),

    #[error("graph query backend returned status {status}: {message}")]
    BackendStatus { status: u16, message: String },

    #[error("batch was dropped before it settled")]
    BatchAborted,

    #[error("missing config file image360.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl Image360Error {
    pub fn annotation(message: impl Into<String>) -> Self {
        Image360Error::AnnotationFormat(message.into())
    }
}
