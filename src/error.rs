//! Error types for the swap orchestrator

use std::fmt;
use thiserror::Error;

/// Stable error classification surfaced to callers of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidAmount,
    InvalidRequest,
    ConfigurationMissing,
    QuoteExpired,
    UpstreamUnavailable,
    TransactionFailed,
    StatusUnresolved,
    OrderInFlight,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::ConfigurationMissing => "CONFIGURATION_MISSING",
            ErrorKind::QuoteExpired => "QUOTE_EXPIRED",
            ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorKind::TransactionFailed => "TRANSACTION_FAILED",
            ErrorKind::StatusUnresolved => "STATUS_UNRESOLVED",
            ErrorKind::OrderInFlight => "ORDER_IN_FLIGHT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Amount {amount} is below the minimum of {minimum} for {asset}")]
    BelowMinimum {
        asset: String,
        amount: String,
        minimum: u128,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Signing unavailable for {family}: key material is not configured")]
    SigningUnavailable { family: String },

    #[error("Quote {quote_id} expired at {expiry}")]
    QuoteExpired { quote_id: String, expiry: String },

    #[error("{service} unavailable: {message}")]
    Upstream { service: String, message: String },

    #[error("Rate limited by {service}")]
    RateLimited { service: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed {
        reason: String,
        tx_id: Option<String>,
    },

    #[error("Status unresolved for order {order_id} after {attempts} attempts (last status: {last_status})")]
    StatusUnresolved {
        order_id: String,
        attempts: u32,
        last_status: String,
    },

    #[error("Intent {intent_id} already has an outstanding order")]
    OrderInFlight { intent_id: String },

    #[error("Operation {operation} is not supported by {provider}")]
    Unsupported { operation: String, provider: String },

    /// Failure observed after a side-effecting call; carries what is needed to reconcile
    #[error("{source} (order {order_id}{})", tx_suffix(.transaction_id))]
    Reconcile {
        order_id: String,
        transaction_id: Option<String>,
        #[source]
        source: Box<SwapError>,
    },
}

fn tx_suffix(tx: &Option<String>) -> String {
    match tx {
        Some(tx) => format!(", tx {}", tx),
        None => String::new(),
    }
}

impl SwapError {
    /// Build an upstream error for a named service
    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        SwapError::Upstream {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Build a transaction failure carrying the backend's native reason
    pub fn tx_failed(reason: impl Into<String>, tx_id: Option<String>) -> Self {
        SwapError::TransactionFailed {
            reason: reason.into(),
            tx_id,
        }
    }

    /// Stable classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::BelowMinimum { .. } | SwapError::InvalidAmount(_) => {
                ErrorKind::InvalidAmount
            }
            SwapError::InvalidRequest(_) | SwapError::Unsupported { .. } => {
                ErrorKind::InvalidRequest
            }
            SwapError::ConfigurationMissing(_) | SwapError::SigningUnavailable { .. } => {
                ErrorKind::ConfigurationMissing
            }
            SwapError::QuoteExpired { .. } => ErrorKind::QuoteExpired,
            SwapError::Upstream { .. } | SwapError::RateLimited { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            SwapError::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            SwapError::StatusUnresolved { .. } => ErrorKind::StatusUnresolved,
            SwapError::OrderInFlight { .. } => ErrorKind::OrderInFlight,
            SwapError::Reconcile { source, .. } => source.kind(),
        }
    }

    /// Check if error may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::UpstreamUnavailable
    }

    /// Check if error is a rate limit response
    pub fn is_rate_limited(&self) -> bool {
        match self {
            SwapError::RateLimited { .. } => true,
            SwapError::Reconcile { source, .. } => source.is_rate_limited(),
            _ => false,
        }
    }

    /// Attach reconciliation context once a side effect has happened
    pub fn with_order(self, order_id: impl Into<String>, transaction_id: Option<String>) -> Self {
        match self {
            // Keep the innermost context; it is the most specific
            SwapError::Reconcile { .. } => self,
            other => {
                let transaction_id = transaction_id.or_else(|| match &other {
                    SwapError::TransactionFailed { tx_id, .. } => tx_id.clone(),
                    _ => None,
                });
                SwapError::Reconcile {
                    order_id: order_id.into(),
                    transaction_id,
                    source: Box::new(other),
                }
            }
        }
    }
}

/// Result type for engine operations
pub type SwapResult<T> = Result<T, SwapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        let err = SwapError::BelowMinimum {
            asset: "xrp".to_string(),
            amount: "1".to_string(),
            minimum: 2_000_000,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        assert_eq!(err.kind().code(), "INVALID_AMOUNT");

        let err = SwapError::SigningUnavailable {
            family: "evm".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ConfigurationMissing);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rate_limit_is_upstream() {
        let err = SwapError::RateLimited {
            service: "squid".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(err.is_retryable());
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_reconcile_context_keeps_kind_and_tx() {
        let err = SwapError::tx_failed("tecUNFUNDED_PAYMENT", Some("ABCD".to_string()))
            .with_order("order-1", None);
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        match &err {
            SwapError::Reconcile {
                order_id,
                transaction_id,
                ..
            } => {
                assert_eq!(order_id, "order-1");
                assert_eq!(transaction_id.as_deref(), Some("ABCD"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let rendered = err.to_string();
        assert!(rendered.contains("tecUNFUNDED_PAYMENT"));
        assert!(rendered.contains("order-1"));

        // Wrapping twice keeps the first context
        let again = err.with_order("other", None);
        assert!(again.to_string().contains("order-1"));
    }
}
