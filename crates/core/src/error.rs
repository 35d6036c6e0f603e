use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("malformed fragment listing line {line}: {reason}")]
    FragmentListing { line: usize, reason: String },

    #[error("fragment not found: {0}")]
    FragmentNotFound(String),
}
