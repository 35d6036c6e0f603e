use thiserror::Error;

/// Fatal requirement catalog errors. Any of these aborts the run before
/// task generation starts.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("specifications base has no mandatory attribute \"{0}\"")]
    MissingAttribute(&'static str),
    #[error("template \"{0}\" has no mandatory attribute \"plugins\"")]
    TemplateWithoutPlugins(String),
    #[error("template \"{template}\" referenced by \"{referrer}\" is not described")]
    UnknownTemplate { template: String, referrer: String },
    #[error("template inheritance cycle among: {0}")]
    TemplateCycle(String),
    #[error("template is not specified for requirement \"{0}\"")]
    NoTemplate(String),
    #[error("invalid description of plugin {index} of \"{owner}\": {reason}")]
    InvalidPlugin { owner: String, index: usize, reason: String },
    #[error("unknown plugin \"{name}\" in \"{owner}\"")]
    UnknownPlugin { owner: String, name: String },
    #[error("plugins of requirement \"{requirement}\" are not described within its template: {names}")]
    UnmatchedPlugins { requirement: String, names: String },
    #[error("stage \"{stage}\" of \"{owner}\" must precede all per-requirement stages")]
    MisplacedSharedStage { owner: String, stage: String },
    #[error("invalid requirement pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("requirement patterns were not matched: {0}")]
    UnmatchedPatterns(String),
    #[error("malformed requirement tree: {0}")]
    MalformedTree(String),
}
