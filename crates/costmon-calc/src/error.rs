use std::time::Duration;

/// Errors surfaced to `calculate` callers. Failures of individual cost
/// sources are not errors; they become warnings on the result.
///
/// # Examples
///
/// ```rust
/// use costmon_calc::CalcError;
///
/// let err = CalcError::AllFailed {
///     errors: vec!["hardware: no data".to_string(), "labor: timeout".to_string()],
/// };
/// assert!(err.to_string().contains("labor: timeout"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("invalid calculation request: {0}")]
    InvalidRequest(String),

    /// The whole request ran past its deadline.
    #[error("calculation timed out after {0:?}")]
    Timeout(Duration),

    /// Every requested sub-calculation failed.
    #[error("all sub-calculations failed: {}", .errors.join("; "))]
    AllFailed { errors: Vec<String> },

    #[error("calculation worker pool is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CalcError>;
