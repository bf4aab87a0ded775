/// Rejections raised by store operations before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("no changes to apply")]
    NoChanges,
    #[error("unknown setting: {0}")]
    UnknownSetting(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NoChanges => "no_changes",
            _ => "validation_failed",
        }
    }
}
