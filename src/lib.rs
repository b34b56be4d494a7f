pub mod allocation;
pub mod config;
pub mod conversion;
pub mod logging;
pub mod quotation;


pub use allocation::{AllocationError, AllocationSession, PartialOrder, PartialOrderAllocator};
pub use config::AllocatorConfig;
pub use conversion::QuotationConverter;
pub use quotation::{GatewayError, ProcurementApi, Quotation};
