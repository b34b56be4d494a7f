use super::error::AllocationError;
use super::session::{AllocationSession, PartialOrder, Selection, SessionState};
use crate::config::AllocatorConfig;
use crate::quotation::{
    CreatePurchaseOrder, GatewayError, ItemId, OrderType, ProcurementApi, Quotation,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Drives an `AllocationSession` and persists each confirmed round as a
/// partial purchase order.
///
/// The session lock is held only for state transitions, never across the
/// network call, so a second caller sees `RoundInFlight` instead of waiting.
pub struct PartialOrderAllocator {
    session: Arc<RwLock<AllocationSession>>,
    api: Arc<dyn ProcurementApi>,
    request_timeout: Duration,
    client_po_number: String,
}

impl PartialOrderAllocator {
    pub fn new(quotation: Quotation, api: Arc<dyn ProcurementApi>) -> Self {
        Self {
            session: Arc::new(RwLock::new(AllocationSession::new(quotation))),
            api,
            request_timeout: Duration::from_secs(AllocatorConfig::default().request_timeout_secs),
            client_po_number: String::new(),
        }
    }

    pub fn from_config(quotation: Quotation, api: Arc<dyn ProcurementApi>, config: &AllocatorConfig) -> Self {
        Self::new(quotation, api).with_timeout(Duration::from_secs(config.request_timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_client_po_number(mut self, client_po_number: impl Into<String>) -> Self {
        self.client_po_number = client_po_number.into();
        self
    }

    /// Copy of the current session, for rendering.
    pub async fn snapshot(&self) -> AllocationSession {
        self.session.read().await.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.session.read().await.state()
    }

    pub async fn selection_limit(&self) -> Option<usize> {
        self.session.read().await.selection_limit()
    }

    pub async fn can_confirm_round(&self) -> bool {
        self.session.read().await.can_confirm_round()
    }

    pub async fn set_target_round_count(&self, n: usize) -> Result<(), AllocationError> {
        let result = self.session.write().await.set_target_round_count(n);
        if let Err(e) = &result {
            warn!(requested = n, error = %e, "partial order count rejected");
        }
        result
    }

    pub async fn toggle_item_selection(&self, id: ItemId) -> Result<Selection, AllocationError> {
        let result = self.session.write().await.toggle_item_selection(id);
        if let Err(e) = &result {
            warn!(item = %id, error = %e, "item selection rejected");
        }
        result
    }

    pub async fn confirm_round(&self) -> Result<PartialOrder, AllocationError> {
        let (ticket, quotation_id) = {
            let mut session = self.session.write().await;
            let ticket = session.begin_round()?;
            (ticket, session.quotation().id())
        };
        let round = ticket.round();

        let request = CreatePurchaseOrder::new(quotation_id, OrderType::Partial, ticket.items())
            .with_client_po_number(self.client_po_number.clone())
            .with_idempotency_key(ticket.idempotency_key());

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.api.create_purchase_order(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.request_timeout)),
        };

        let mut session = self.session.write().await;
        match result {
            Ok(record) => {
                let purchase_order = record.id;
                match session.complete_round(ticket, record) {
                    Ok(order) => Ok(order.clone()),
                    Err(AllocationError::StaleRound { .. }) => {
                        warn!(
                            quotation = %quotation_id,
                            round,
                            purchase_order = %purchase_order,
                            "purchase order created for a round that was cancelled"
                        );
                        Err(AllocationError::RoundCancelled {
                            round,
                            purchase_order: Some(purchase_order),
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(source) => {
                let outcome_unknown = source.outcome_unknown();
                if session.abort_round(ticket, outcome_unknown).is_err() {
                    return Err(AllocationError::RoundCancelled {
                        round,
                        purchase_order: None,
                    });
                }
                warn!(
                    quotation = %quotation_id,
                    round,
                    outcome_unknown,
                    error = %source,
                    "failed to create partial order"
                );
                Err(AllocationError::PersistenceFailed {
                    round,
                    outcome_unknown,
                    source,
                })
            }
        }
    }

    /// Give up on a round whose `confirm_round` call was abandoned.
    pub async fn cancel_round(&self) -> Option<usize> {
        let cancelled = self.session.write().await.cancel_in_flight();
        if let Some(round) = cancelled {
            warn!(round, "in-flight partial order cancelled; server outcome unknown");
        }
        cancelled
    }

    pub async fn finish_session(&self) -> Result<Vec<PartialOrder>, AllocationError> {
        let rounds = self.session.write().await.finish_session()?;
        info!(rounds = rounds.len(), "all partial orders created");
        Ok(rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::error::NotReady;
    use crate::quotation::{InMemoryProcurementApi, OrderType};
    use crate::test_helpers::fixtures::sample_quotation;

    async fn allocator_with(
        api: InMemoryProcurementApi,
        items: usize,
    ) -> (Arc<InMemoryProcurementApi>, PartialOrderAllocator) {
        let quotation = sample_quotation(items);
        api.insert_quotation(quotation.clone()).await;
        let api = Arc::new(api);
        let allocator = PartialOrderAllocator::new(quotation, api.clone());
        (api, allocator)
    }

    #[tokio::test]
    async fn test_each_round_becomes_a_partial_order() {
        crate::logging::init_test();
        let (api, allocator) = allocator_with(InMemoryProcurementApi::new(), 5).await;
        let allocator = allocator.with_client_po_number("CPO-77");

        allocator.set_target_round_count(2).await.unwrap();
        allocator.toggle_item_selection(ItemId(1)).await.unwrap();
        allocator.toggle_item_selection(ItemId(2)).await.unwrap();
        let first = allocator.confirm_round().await.unwrap();
        assert_eq!(first.round, 1);

        for id in 3..=5 {
            allocator.toggle_item_selection(ItemId(id)).await.unwrap();
        }
        let second = allocator.confirm_round().await.unwrap();
        assert_eq!(second.round, 2);

        let rounds = allocator.finish_session().await.unwrap();
        assert_eq!(rounds, vec![first, second]);

        let orders = api.orders_for(sample_quotation(5).id()).await;
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|po| po.order_type == OrderType::Partial));
        assert!(orders.iter().all(|po| po.client_po_number == "CPO-77"));
        assert_eq!(orders[1].items.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_persistence_leaves_session_unchanged() {
        let (api, allocator) = allocator_with(InMemoryProcurementApi::new(), 4).await;
        allocator.set_target_round_count(2).await.unwrap();
        allocator.toggle_item_selection(ItemId(2)).await.unwrap();

        api.fail_next_create(GatewayError::Status {
            status: 503,
            detail: "Service Unavailable".to_string(),
        })
        .await;

        let before = allocator.snapshot().await;
        let err = allocator.confirm_round().await.unwrap_err();
        match err {
            AllocationError::PersistenceFailed {
                round,
                outcome_unknown,
                ..
            } => {
                assert_eq!(round, 1);
                assert!(!outcome_unknown);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let after = allocator.snapshot().await;
        assert_eq!(after.rounds(), before.rounds());
        assert_eq!(after.consumed_item_ids(), before.consumed_item_ids());
        assert_eq!(after.pending_selection(), before.pending_selection());
        assert_eq!(after.state(), SessionState::Configuring);

        // same round can be retried
        allocator.confirm_round().await.unwrap();
        assert_eq!(api.orders_for(after.quotation().id()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_unknown_outcome() {
        let api = InMemoryProcurementApi::new().with_latency(Duration::from_millis(500));
        let (_api, allocator) = allocator_with(api, 2).await;
        let allocator = allocator.with_timeout(Duration::from_millis(20));

        allocator.set_target_round_count(2).await.unwrap();
        allocator.toggle_item_selection(ItemId(1)).await.unwrap();

        let err = allocator.confirm_round().await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::PersistenceFailed {
                outcome_unknown: true,
                source: GatewayError::Timeout(_),
                ..
            }
        ));
        let session = allocator.snapshot().await;
        assert!(session.last_outcome_unknown());
        assert!(session.rounds().is_empty());
        assert!(session.can_confirm_round());
    }

    #[tokio::test]
    async fn test_second_confirm_while_in_flight_is_rejected() {
        let api = InMemoryProcurementApi::new().with_latency(Duration::from_millis(200));
        let (api, allocator) = allocator_with(api, 3).await;
        let allocator = Arc::new(allocator);

        allocator.set_target_round_count(2).await.unwrap();
        allocator.toggle_item_selection(ItemId(1)).await.unwrap();

        let first = {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.confirm_round().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(allocator.state().await, SessionState::RoundInFlight);
        assert!(matches!(
            allocator.confirm_round().await,
            Err(AllocationError::RoundInFlight { round: 1 })
        ));
        assert!(matches!(
            allocator.toggle_item_selection(ItemId(2)).await,
            Err(AllocationError::RoundInFlight { .. })
        ));

        first.await.unwrap().unwrap();
        assert_eq!(api.orders_for(sample_quotation(3).id()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_round_can_be_retried() {
        let api = InMemoryProcurementApi::new().with_latency(Duration::from_millis(300));
        let (_api, allocator) = allocator_with(api, 2).await;
        let allocator = Arc::new(allocator);

        allocator.set_target_round_count(1).await.unwrap();
        allocator.toggle_item_selection(ItemId(1)).await.unwrap();
        allocator.toggle_item_selection(ItemId(2)).await.unwrap();

        let pending = {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.confirm_round().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        pending.abort();
        let _ = pending.await;

        assert_eq!(allocator.state().await, SessionState::RoundInFlight);
        assert_eq!(allocator.cancel_round().await, Some(1));
        assert!(allocator.snapshot().await.last_outcome_unknown());

        let order = allocator.confirm_round().await.unwrap();
        assert_eq!(order.items.len(), 2);
        assert!(!allocator.snapshot().await.last_outcome_unknown());
        allocator.finish_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_confirm_before_selection_is_not_ready() {
        let (_api, allocator) = allocator_with(InMemoryProcurementApi::new(), 3).await;
        allocator.set_target_round_count(3).await.unwrap();

        assert!(!allocator.can_confirm_round().await);
        assert!(matches!(
            allocator.confirm_round().await,
            Err(AllocationError::RoundNotReady(NotReady::EmptySelection))
        ));
    }
}
