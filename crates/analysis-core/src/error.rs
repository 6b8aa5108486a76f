use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("External fetch failed: {0}")]
    ExternalFetch(String),

    #[error("Cooldown active for {key}, retry in {retry_after_secs}s")]
    CooldownActive { key: String, retry_after_secs: u64 },

    #[error("Already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Session not closed yet: {0}")]
    NotYetClosed(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AnalysisError {
    /// Conflicts are surfaced to callers as rejections rather than failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AnalysisError::CooldownActive { .. } | AnalysisError::AlreadyResolved(_)
        )
    }
}
