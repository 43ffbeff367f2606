//! Port traits: the seams along which this crate's own infrastructure
//! (Modbus transport, database persistence) and its mock counterparts for
//! tests are interchangeable.

pub mod plc_transport;
pub mod persistence_adapter;

pub use plc_transport::*;
pub use persistence_adapter::*;

use crate::utils::error::AppResult;
use async_trait::async_trait;

/// Shared lifecycle surface for long-lived services.
#[async_trait]
pub trait BaseService: Send + Sync {
    fn service_name(&self) -> &'static str;

    async fn initialize(&mut self) -> AppResult<()>;

    async fn shutdown(&mut self) -> AppResult<()>;

    async fn health_check(&self) -> AppResult<()>;
}
