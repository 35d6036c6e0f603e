use vtg_catalog::CatalogError;
use vtg_core::CoreError;

use crate::pipeline::StageError;

/// Fatal errors of a generation run. Per-item failures never surface here;
/// they are reported as failed tasks.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("configuration error: {0}")]
    Core(#[from] CoreError),
    #[error("requirement catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("plugin stage setup error: {0}")]
    Stage(#[from] StageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fragment descriptions were never delivered")]
    HandshakeDropped,
}
