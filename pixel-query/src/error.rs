use thiserror::Error;

/// Errors raised by query selection.
///
/// They travel inside [anyhow::Error] and can be recovered with
/// `downcast_ref::<QueryError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unsupported query strategy '{0}'")]
    UnsupportedStrategy(String),
    #[error("invalid query configuration: {0}")]
    InvalidConfig(String),
    #[error("no pixels were selected in query round {round}")]
    BudgetExhausted { round: usize },
}
