use thiserror::Error;

/// A single validation failure: the dotted path of the offending field and
/// the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid field '{field}': {detail}")]
pub struct ValidationError {
    pub field: String,
    pub detail: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

/// Joins a parent path and a child key with a dot.
pub(crate) fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}
