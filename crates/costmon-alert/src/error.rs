/// Errors raised by rule registration, evaluation and alert transitions.
///
/// # Examples
///
/// ```rust
/// use costmon_alert::AlertError;
///
/// let err = AlertError::InvalidRuleConfig {
///     rule: "gpu cost".to_string(),
///     reason: "threshold_value is required".to_string(),
/// };
/// assert!(err.to_string().contains("threshold_value"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlertError {
    /// Rejected at registration: missing threshold, non-positive window,
    /// unknown comparator or metric, and similar.
    #[error("invalid rule config for '{rule}': {reason}")]
    InvalidRuleConfig { rule: String, reason: String },

    /// Evaluating one rule failed. Other rules are unaffected.
    #[error("evaluation of rule '{rule_id}' failed: {reason}")]
    Evaluation { rule_id: String, reason: String },

    #[error("rule '{0}' not found")]
    RuleNotFound(String),

    #[error("rule '{0}' already exists")]
    DuplicateRule(String),

    #[error("alert '{0}' not found")]
    AlertNotFound(String),

    #[error("alert '{0}' is already resolved")]
    AlertAlreadyResolved(String),

    #[error("alert '{0}' is already acknowledged")]
    AlertAlreadyAcknowledged(String),

    /// An active alert already exists for this rule and target.
    #[error("rule '{rule_id}' already has an active alert for target '{target_id}'")]
    DuplicateActiveAlert { rule_id: String, target_id: String },
}

pub type Result<T> = std::result::Result<T, AlertError>;
