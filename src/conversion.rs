use crate::allocation::{AllocationError, PartialOrderAllocator};
use crate::config::AllocatorConfig;
use crate::quotation::{
    CreatePurchaseOrder, GatewayError, OrderType, ProcurementApi, PurchaseOrderRecord, Quotation,
    QuotationId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Entry point for turning a quotation into purchase orders, either as one
/// full order or split across several partial ones.
pub struct QuotationConverter {
    api: Arc<dyn ProcurementApi>,
    config: AllocatorConfig,
}

impl QuotationConverter {
    pub fn new(api: Arc<dyn ProcurementApi>, config: AllocatorConfig) -> Self {
        Self { api, config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    pub async fn fetch_quotation(&self, id: QuotationId) -> Result<Quotation, AllocationError> {
        let quotation = tokio::time::timeout(self.timeout(), self.api.fetch_quotation(id))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout()))??;
        Ok(quotation)
    }

    pub async fn convert_full(
        &self,
        quotation: &Quotation,
        client_po_number: &str,
    ) -> Result<PurchaseOrderRecord, AllocationError> {
        if !quotation.purchase_orders().is_empty() {
            return Err(AllocationError::ConversionBlocked(format!(
                "quotation {} already has {} purchase order(s)",
                quotation.quotation_no(),
                quotation.purchase_orders().len()
            )));
        }

        let request = CreatePurchaseOrder::new(quotation.id(), OrderType::Full, quotation.items())
            .with_client_po_number(client_po_number)
            .with_idempotency_key(Uuid::new_v4());
        let record = tokio::time::timeout(self.timeout(), self.api.create_purchase_order(request))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout()))??;

        info!(
            quotation = %quotation.id(),
            purchase_order = %record.id,
            items = record.items.len(),
            "full purchase order created"
        );
        Ok(record)
    }

    pub fn open_partial_session(&self, quotation: Quotation) -> Result<PartialOrderAllocator, AllocationError> {
        if quotation.has_order_of_type(OrderType::Full) {
            return Err(AllocationError::ConversionBlocked(format!(
                "quotation {} was already converted to a full purchase order",
                quotation.quotation_no()
            )));
        }
        if quotation.has_order_of_type(OrderType::Partial) {
            return Err(AllocationError::ConversionBlocked(format!(
                "quotation {} already has partial purchase orders from another session",
                quotation.quotation_no()
            )));
        }
        if quotation.item_count() < 2 {
            return Err(AllocationError::ConversionBlocked(format!(
                "quotation {} has a single item and cannot be split",
                quotation.quotation_no()
            )));
        }

        info!(quotation = %quotation.id(), items = quotation.item_count(), "partial order session opened");
        Ok(PartialOrderAllocator::from_config(
            quotation,
            self.api.clone(),
            &self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotation::{InMemoryProcurementApi, ItemId};
    use crate::test_helpers::fixtures::sample_quotation;

    async fn converter_with(items: usize) -> (Arc<InMemoryProcurementApi>, QuotationConverter, QuotationId) {
        let api = Arc::new(InMemoryProcurementApi::new());
        let quotation = sample_quotation(items);
        let id = quotation.id();
        api.insert_quotation(quotation).await;
        let converter = QuotationConverter::new(api.clone(), AllocatorConfig::default());
        (api, converter, id)
    }

    #[tokio::test]
    async fn test_full_conversion_takes_every_item() {
        let (api, converter, id) = converter_with(3).await;
        let quotation = converter.fetch_quotation(id).await.unwrap();

        let record = converter.convert_full(&quotation, "PO-1001").await.unwrap();
        assert_eq!(record.order_type, OrderType::Full);
        assert_eq!(record.client_po_number, "PO-1001");
        assert_eq!(record.items.len(), 3);

        let refreshed = converter.fetch_quotation(id).await.unwrap();
        assert!(matches!(
            converter.convert_full(&refreshed, "PO-1002").await,
            Err(AllocationError::ConversionBlocked(_))
        ));
        assert!(matches!(
            converter.open_partial_session(refreshed),
            Err(AllocationError::ConversionBlocked(_))
        ));
        assert_eq!(api.orders_for(id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_session_blocked_after_earlier_partials() {
        let (_api, converter, id) = converter_with(3).await;
        let quotation = converter.fetch_quotation(id).await.unwrap();

        let allocator = converter.open_partial_session(quotation).unwrap();
        allocator.set_target_round_count(2).await.unwrap();
        allocator.toggle_item_selection(ItemId(1)).await.unwrap();
        allocator.confirm_round().await.unwrap();

        let refreshed = converter.fetch_quotation(id).await.unwrap();
        assert!(matches!(
            converter.open_partial_session(refreshed),
            Err(AllocationError::ConversionBlocked(_))
        ));
    }

    #[tokio::test]
    async fn test_single_item_quotation_cannot_be_split() {
        let (_api, converter, id) = converter_with(1).await;
        let quotation = converter.fetch_quotation(id).await.unwrap();
        assert!(converter.open_partial_session(quotation).is_err());
    }

    #[tokio::test]
    async fn test_missing_quotation_surfaces_api_error() {
        let (_api, converter, _id) = converter_with(2).await;
        let err = converter.fetch_quotation(QuotationId(404)).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::Api(GatewayError::Status { status: 404, .. })
        ));
    }
}
