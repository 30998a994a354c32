#[derive(Debug, thiserror::Error)]
pub enum LazeError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{module} in {context} depends on unavailable module \"{missing}\"")]
    ModuleNotAvailable {
        context: String,
        module: String,
        missing: String,
    },

    #[error("conflict at {path} ({left}, {right})")]
    ConflictAtPath {
        path: String,
        left: String,
        right: String,
    },

    #[error("download error: {0}")]
    DownloadError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LazeError>;
