pub mod api_client;
pub mod client;
pub mod types;

pub use api_client::HttpProcurementApi;
pub use client::{create_procurement_api, GatewayError, InMemoryProcurementApi, ProcurementApi};
pub use types::*;
