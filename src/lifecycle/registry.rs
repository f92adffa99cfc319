//! Swap registry - one outstanding order per intent, plus finished reports

use super::state::{OrderState, SwapOutcome, SwapReport};
use crate::error::{SwapError, SwapResult};
use crate::types::ProviderKind;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Finished reports kept for the status API
const MAX_FINISHED: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct InFlightSwap {
    pub intent_id: Uuid,
    pub provider: ProviderKind,
    pub state: OrderState,
    pub order_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SwapRegistry {
    in_flight: DashMap<Uuid, InFlightSwap>,
    finished: DashMap<Uuid, SwapReport>,
}

impl SwapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `intent_id`.
    ///
    /// Fails while another order for it is outstanding, while an earlier order awaits
    /// reconciliation, and once an earlier order for it settled successfully.
    pub fn claim(self: &Arc<Self>, intent_id: Uuid, provider: ProviderKind) -> SwapResult<InFlightGuard> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(intent_id) {
            Entry::Occupied(_) => Err(SwapError::OrderInFlight {
                intent_id: intent_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                if let Some(previous) = self.finished.get(&intent_id) {
                    if previous.needs_reconciliation {
                        return Err(SwapError::OrderInFlight {
                            intent_id: intent_id.to_string(),
                        });
                    }
                    if previous.outcome() == Some(SwapOutcome::Success) {
                        return Err(SwapError::InvalidRequest(format!(
                            "intent {} already settled",
                            intent_id
                        )));
                    }
                }
                slot.insert(InFlightSwap {
                    intent_id,
                    provider,
                    state: OrderState::Quoted,
                    order_id: None,
                    started_at: Utc::now(),
                });
                Ok(InFlightGuard {
                    registry: Arc::clone(self),
                    intent_id,
                })
            }
        }
    }

    pub fn update(&self, intent_id: Uuid, state: OrderState, order_id: Option<&str>) {
        if let Some(mut entry) = self.in_flight.get_mut(&intent_id) {
            entry.state = state;
            if let Some(id) = order_id {
                entry.order_id = Some(id.to_string());
            }
        }
    }

    /// Keep a finished report; the oldest are evicted past the cap, reports awaiting
    /// reconciliation last
    pub fn record(&self, report: SwapReport) {
        if self.finished.len() >= MAX_FINISHED {
            let oldest = self
                .finished
                .iter()
                .min_by_key(|r| (r.needs_reconciliation, r.history.first().map(|t| t.at)))
                .map(|r| *r.key());
            if let Some(id) = oldest {
                self.finished.remove(&id);
            }
        }
        self.finished.insert(report.intent_id, report);
    }

    pub fn is_in_flight(&self, intent_id: &Uuid) -> bool {
        self.in_flight.contains_key(intent_id)
    }

    pub fn in_flight(&self) -> Vec<InFlightSwap> {
        self.in_flight.iter().map(|e| e.value().clone()).collect()
    }

    pub fn finished(&self) -> Vec<SwapReport> {
        self.finished.iter().map(|e| e.value().clone()).collect()
    }

    pub fn report(&self, intent_id: &Uuid) -> Option<SwapReport> {
        self.finished.get(intent_id).map(|r| r.clone())
    }
}

/// Releases the intent when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<SwapRegistry>,
    intent_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.in_flight.remove(&self.intent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_second_claim_is_rejected_until_release() {
        let registry = Arc::new(SwapRegistry::new());
        let id = Uuid::new_v4();

        let guard = registry.claim(id, ProviderKind::OneClick).unwrap();
        let err = registry.claim(id, ProviderKind::SquidRouter).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrderInFlight);

        registry.update(id, OrderState::Submitted, Some("rDeposit"));
        let entry = &registry.in_flight()[0];
        assert_eq!(entry.state, OrderState::Submitted);
        assert_eq!(entry.order_id.as_deref(), Some("rDeposit"));

        drop(guard);
        assert!(!registry.is_in_flight(&id));
        assert!(registry.claim(id, ProviderKind::OneClick).is_ok());
    }

    #[test]
    fn test_unreconciled_report_keeps_intent_claimed() {
        let registry = Arc::new(SwapRegistry::new());
        let id = Uuid::new_v4();

        let mut report = SwapReport::new(id, ProviderKind::OneClick);
        report.order_id = Some("rDeposit".to_string());
        report.fail("status unresolved");
        report.needs_reconciliation = true;
        registry.record(report);

        let err = registry.claim(id, ProviderKind::OneClick).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrderInFlight);
        assert!(!registry.is_in_flight(&id));
    }

    #[test]
    fn test_settled_intent_is_not_rerun() {
        let registry = Arc::new(SwapRegistry::new());
        let id = Uuid::new_v4();

        let mut report = SwapReport::new(id, ProviderKind::OneClick);
        report.advance(OrderState::Settling, None).unwrap();
        report.advance(OrderState::Terminal(SwapOutcome::Success), None).unwrap();
        registry.record(report);
        assert_eq!(
            registry.claim(id, ProviderKind::OneClick).unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        // A failure before anything was sent may be retried
        let retry = Uuid::new_v4();
        let mut failed = SwapReport::new(retry, ProviderKind::OneClick);
        failed.fail("quote expired");
        registry.record(failed);
        assert!(registry.claim(retry, ProviderKind::OneClick).is_ok());
    }

    #[test]
    fn test_record_finished() {
        let registry = SwapRegistry::new();
        let report = SwapReport::new(Uuid::new_v4(), ProviderKind::FusionPlus);
        let id = report.intent_id;
        registry.record(report);
        assert_eq!(registry.finished().len(), 1);
        assert_eq!(registry.report(&id).unwrap().provider, ProviderKind::FusionPlus);
    }
}
