pub mod catalog;
pub mod classify;
pub mod error;
pub mod spec;
pub mod stage;

pub use catalog::{write_checked, RequirementCatalog};
pub use classify::{fingerprint, RequirementClass, RequirementClasses, RequirementClassifier};
pub use error::CatalogError;
pub use spec::{merge_options, RequirementSpec, StageDesc, StageOptions};
pub use stage::{StageKind, UnknownStage};
