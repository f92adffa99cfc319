//! Order states and the per-swap report

use crate::error::{SwapError, SwapResult};
use crate::types::{NormalizedStatus, ProviderKind, StatusKind, TxResult};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapOutcome {
    Success,
    Expired,
    Refunded,
    Failed,
}

impl SwapOutcome {
    /// Outcome for a terminal backend status
    pub fn from_status(kind: StatusKind) -> Self {
        match kind {
            StatusKind::Success => SwapOutcome::Success,
            StatusKind::Expired => SwapOutcome::Expired,
            StatusKind::Refunded => SwapOutcome::Refunded,
            _ => SwapOutcome::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapOutcome::Success => "success",
            SwapOutcome::Expired => "expired",
            SwapOutcome::Refunded => "refunded",
            SwapOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum OrderState {
    Quoted,
    Created,
    Submitted,
    /// Escrow only: waiting for the first fill to become ready
    AwaitingFill,
    /// Escrow only
    SecretsReleased,
    Settling,
    Terminal(SwapOutcome),
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Terminal(_))
    }

    /// Allowed forward transitions; any live state may fail
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (Terminal(_), _) => false,
            (_, Terminal(SwapOutcome::Failed)) => true,
            (Quoted, Created)
            | (Created, Submitted)
            | (Submitted, AwaitingFill)
            | (Submitted, Settling)
            | (AwaitingFill, SecretsReleased)
            | (AwaitingFill, Settling)
            | (SecretsReleased, Settling)
            | (Settling, Terminal(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderState::Quoted => f.write_str("quoted"),
            OrderState::Created => f.write_str("created"),
            OrderState::Submitted => f.write_str("submitted"),
            OrderState::AwaitingFill => f.write_str("awaiting_fill"),
            OrderState::SecretsReleased => f.write_str("secrets_released"),
            OrderState::Settling => f.write_str("settling"),
            OrderState::Terminal(outcome) => write!(f, "terminal:{}", outcome.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub state: OrderState,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// What happened to one swap, from quote to terminal state
#[derive(Debug, Clone, Serialize)]
pub struct SwapReport {
    pub intent_id: Uuid,
    pub provider: ProviderKind,
    pub quote_id: Option<String>,
    pub order_id: Option<String>,
    pub transaction: Option<TxResult>,
    pub state: OrderState,
    pub final_status: Option<NormalizedStatus>,
    /// Backend or engine reason when the outcome is not a success
    pub reason: Option<String>,
    pub released_fills: Vec<usize>,
    /// Failed after a side effect; the intent stays claimed until an operator settles it
    pub needs_reconciliation: bool,
    pub history: Vec<StateTransition>,
}

impl SwapReport {
    pub fn new(intent_id: Uuid, provider: ProviderKind) -> Self {
        Self {
            intent_id,
            provider,
            quote_id: None,
            order_id: None,
            transaction: None,
            state: OrderState::Quoted,
            final_status: None,
            reason: None,
            released_fills: Vec::new(),
            needs_reconciliation: false,
            history: Vec::new(),
        }
    }

    /// Move to `next`, recording it in the history
    pub fn advance(&mut self, next: OrderState, note: Option<String>) -> SwapResult<()> {
        if !self.history.is_empty() && !self.state.can_transition_to(next) {
            return Err(SwapError::InvalidRequest(format!(
                "illegal transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        self.history.push(StateTransition {
            state: next,
            at: Utc::now(),
            note,
        });
        Ok(())
    }

    /// Record a failure; a report that is already terminal keeps its outcome
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.state.is_terminal() {
            return;
        }
        self.state = OrderState::Terminal(SwapOutcome::Failed);
        self.history.push(StateTransition {
            state: self.state,
            at: Utc::now(),
            note: Some(reason.clone()),
        });
        self.reason = Some(reason);
    }

    pub fn outcome(&self) -> Option<SwapOutcome> {
        match self.state {
            OrderState::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// States visited, in order
    pub fn path(&self) -> Vec<OrderState> {
        self.history.iter().map(|t| t.state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(SwapOutcome::from_status(StatusKind::Success), SwapOutcome::Success);
        assert_eq!(SwapOutcome::from_status(StatusKind::Expired), SwapOutcome::Expired);
        assert_eq!(SwapOutcome::from_status(StatusKind::Refunded), SwapOutcome::Refunded);
        assert_eq!(SwapOutcome::from_status(StatusKind::NeedsGas), SwapOutcome::Failed);
        assert_eq!(SwapOutcome::from_status(StatusKind::NotFound), SwapOutcome::Failed);
        assert_eq!(SwapOutcome::from_status(StatusKind::PartialSuccess), SwapOutcome::Failed);
    }

    #[test]
    fn test_transitions() {
        use OrderState::*;
        assert!(Quoted.can_transition_to(Created));
        assert!(Submitted.can_transition_to(Settling));
        assert!(Submitted.can_transition_to(AwaitingFill));
        assert!(!Created.can_transition_to(Settling));
        assert!(!Quoted.can_transition_to(SecretsReleased));
        assert!(Created.can_transition_to(Terminal(SwapOutcome::Failed)));
        assert!(!Created.can_transition_to(Terminal(SwapOutcome::Success)));
        assert!(!Terminal(SwapOutcome::Success).can_transition_to(Settling));
    }

    #[test]
    fn test_report_history() {
        let mut report = SwapReport::new(Uuid::new_v4(), ProviderKind::OneClick);
        report.advance(OrderState::Quoted, None).unwrap();
        report.advance(OrderState::Created, None).unwrap();
        assert!(report.advance(OrderState::Settling, None).is_err());

        report.fail("deposit rejected");
        assert_eq!(report.outcome(), Some(SwapOutcome::Failed));
        assert_eq!(report.reason.as_deref(), Some("deposit rejected"));

        // A second failure does not overwrite the first
        report.fail("later");
        assert_eq!(report.reason.as_deref(), Some("deposit rejected"));
        assert_eq!(
            report.path(),
            vec![
                OrderState::Quoted,
                OrderState::Created,
                OrderState::Terminal(SwapOutcome::Failed)
            ]
        );
    }
}
