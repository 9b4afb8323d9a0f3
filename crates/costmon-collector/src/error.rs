use std::time::Duration;

/// Failure of a single cost source call. Always recoverable: the caller
/// drops that adapter's contribution and carries on.
///
/// # Examples
///
/// ```rust
/// use costmon_collector::AdapterError;
///
/// let err = AdapterError::Unavailable("labor".to_string());
/// assert!(err.to_string().contains("labor"));
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// The calculator ran but could not produce figures for the target.
    #[error("cost source '{adapter}' failed for target '{target}': {message}")]
    Failed {
        adapter: String,
        target: String,
        message: String,
    },

    /// The call did not finish within the per-call timeout.
    #[error("cost source '{adapter}' timed out after {timeout:?}")]
    Timeout { adapter: String, timeout: Duration },

    /// The backing calculator is not reachable at all.
    #[error("cost source '{0}' is unavailable")]
    Unavailable(String),

    /// The worker running the call panicked or was cancelled.
    #[error("cost source task aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, AdapterError>;
