use super::client::{GatewayError, ProcurementApi};
use super::types::*;
use crate::config::AllocatorConfig;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct HttpProcurementApi {
    client: Client,
    base_url: String,
    access_token: Option<String>,
    send_idempotency_key: bool,
}

impl HttpProcurementApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: normalize_base_url(base_url),
            access_token: None,
            send_idempotency_key: true,
        }
    }

    pub fn from_config(config: &AllocatorConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.api_base_url),
            access_token: config.access_token.clone(),
            send_idempotency_key: config.send_idempotency_key,
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            })
        }
    }
}

#[async_trait]
impl ProcurementApi for HttpProcurementApi {
    async fn fetch_quotation(&self, id: QuotationId) -> Result<Quotation, GatewayError> {
        let url = self.url(&format!("quotations/{}/", id));
        debug!(%url, "fetching quotation");

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn create_purchase_order(
        &self,
        request: CreatePurchaseOrder,
    ) -> Result<PurchaseOrderRecord, GatewayError> {
        let url = self.url("purchase-orders/");
        debug!(
            %url,
            quotation = %request.quotation,
            order_type = %request.order_type,
            items = request.items.len(),
            "creating purchase order"
        );

        let mut builder = self.authorize(self.client.post(&url)).json(&request);
        if self.send_idempotency_key {
            if let Some(key) = request.idempotency_key {
                builder = builder.header(IDEMPOTENCY_HEADER, key.to_string());
            }
        }

        let response = builder.send().await.map_err(transport_error)?;
        let result = Self::decode(response).await;
        if let Err(e) = &result {
            warn!(quotation = %request.quotation, error = %e, "purchase order request rejected");
        }
        result
    }
}

fn normalize_base_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    // A refused connection never reached the server; anything later might have.
    GatewayError::Transport {
        maybe_sent: !e.is_connect() && !e.is_builder(),
        message: e.to_string(),
    }
}

/// DRF puts a human-readable reason in `detail`; validation errors come back as
/// field maps or bare lists instead.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => {
            if let Some(serde_json::Value::String(detail)) = map.get("detail") {
                return detail.clone();
            }
            serde_json::Value::Object(map).to_string()
        }
        Ok(other) => other.to_string(),
        Err(_) if body.is_empty() => "Unknown error".to_string(),
        Err(_) => body.to_string(),
    }
}
