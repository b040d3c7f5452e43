#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("render error: {reason}")]
    Render { reason: String },

    #[error("description error: {reason}")]
    Description { reason: String },

    #[error("format error: {0}")]
    Fmt(#[from] std::fmt::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
