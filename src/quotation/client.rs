use super::api_client::HttpProcurementApi;
use super::types::*;
use crate::config::AllocatorConfig;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("transport error: {message}")]
    Transport { message: String, maybe_sent: bool },

    #[error("no response after {0:?}")]
    Timeout(Duration),

    #[error("server responded {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid client configuration: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// True when the server may have acted on the request even though no usable
    /// response came back.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            GatewayError::Transport { maybe_sent, .. } => *maybe_sent,
            GatewayError::Timeout(_) | GatewayError::Decode(_) => true,
            GatewayError::Status { .. } | GatewayError::Configuration(_) => false,
        }
    }
}

/// The REST backend that owns quotations and purchase orders.
#[async_trait]
pub trait ProcurementApi: Send + Sync {
    async fn fetch_quotation(&self, id: QuotationId) -> Result<Quotation, GatewayError>;
    async fn create_purchase_order(
        &self,
        request: CreatePurchaseOrder,
    ) -> Result<PurchaseOrderRecord, GatewayError>;
}

/// Backend kept in process memory, for local runs and tests.
pub struct InMemoryProcurementApi {
    quotations: Arc<RwLock<HashMap<QuotationId, Quotation>>>,
    orders: Arc<RwLock<Vec<PurchaseOrderRecord>>>,
    idempotency_keys: Arc<RwLock<HashMap<Uuid, PurchaseOrderId>>>,
    injected_failures: Arc<RwLock<VecDeque<GatewayError>>>,
    next_order_id: Arc<RwLock<u64>>,
    latency: Option<Duration>,
}

impl InMemoryProcurementApi {
    pub fn new() -> Self {
        Self {
            quotations: Arc::new(RwLock::new(HashMap::new())),
            orders: Arc::new(RwLock::new(Vec::new())),
            idempotency_keys: Arc::new(RwLock::new(HashMap::new())),
            injected_failures: Arc::new(RwLock::new(VecDeque::new())),
            next_order_id: Arc::new(RwLock::new(1)),
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn insert_quotation(&self, quotation: Quotation) {
        self.quotations.write().await.insert(quotation.id(), quotation);
    }

    /// Queue an error to be returned by the next create call instead of creating an order.
    pub async fn fail_next_create(&self, error: GatewayError) {
        self.injected_failures.write().await.push_back(error);
    }

    pub async fn orders_for(&self, quotation: QuotationId) -> Vec<PurchaseOrderRecord> {
        self.orders
            .read()
            .await
            .iter()
            .filter(|po| po.quotation == quotation)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryProcurementApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcurementApi for InMemoryProcurementApi {
    async fn fetch_quotation(&self, id: QuotationId) -> Result<Quotation, GatewayError> {
        let quotation = self
            .quotations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                detail: "Not found.".to_string(),
            })?;

        let orders = self.orders_for(id).await;
        Ok(quotation.with_purchase_orders(orders))
    }

    async fn create_purchase_order(
        &self,
        request: CreatePurchaseOrder,
    ) -> Result<PurchaseOrderRecord, GatewayError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.injected_failures.write().await.pop_front() {
            return Err(error);
        }

        if !self.quotations.read().await.contains_key(&request.quotation) {
            return Err(GatewayError::Status {
                status: 400,
                detail: format!("Invalid pk \"{}\" - object does not exist.", request.quotation),
            });
        }
        if request.items.iter().any(|item| item.quantity < 1) {
            return Err(GatewayError::Status {
                status: 400,
                detail: "Quantity is required and must be at least 1.".to_string(),
            });
        }

        // Held until the order is stored so a key lookup and its insert are one step.
        let mut next_id = self.next_order_id.write().await;
        if let Some(key) = request.idempotency_key {
            if let Some(existing) = self.idempotency_keys.read().await.get(&key) {
                let orders = self.orders.read().await;
                if let Some(order) = orders.iter().find(|po| po.id == *existing) {
                    return Ok(order.clone());
                }
            }
        }

        let record = PurchaseOrderRecord {
            id: PurchaseOrderId(*next_id),
            quotation: request.quotation,
            client_po_number: request.client_po_number,
            order_type: request.order_type,
            created_at: Some(chrono::Utc::now()),
            items: request
                .items
                .into_iter()
                .enumerate()
                .map(|(i, line)| PurchaseOrderLine {
                    id: Some(*next_id * 1000 + i as u64),
                    ..line
                })
                .collect(),
        };
        *next_id += 1;

        if let Some(key) = request.idempotency_key {
            self.idempotency_keys.write().await.insert(key, record.id);
        }
        self.orders.write().await.push(record.clone());
        Ok(record)
    }
}

pub fn create_procurement_api(config: &AllocatorConfig) -> Result<Arc<dyn ProcurementApi>, GatewayError> {
    let api = HttpProcurementApi::from_config(config)?;
    Ok(Arc::new(api))
}
