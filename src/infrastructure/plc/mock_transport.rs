//! In-memory `PlcTransport` double, following the source lineage's pattern
//! of hand-writing a mock behind the same trait rather than reaching for
//! `mockall`. Backs the sync loop, dispatcher, and recipe executor tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::services::{BaseService, PlcConnectionStatus, PlcTransport};
use crate::utils::error::{AppError, AppResult};

#[derive(Default)]
struct MockState {
    holding: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    connected: bool,
}

pub struct MockPlcTransport {
    state: Mutex<MockState>,
    /// When set, the next matching operation fails once before the mock
    /// reverts to its normal behavior, to exercise retry paths.
    fail_next_read: std::sync::atomic::AtomicBool,
    fail_next_write: std::sync::atomic::AtomicBool,
}

impl MockPlcTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState { connected: true, ..Default::default() }),
            fail_next_read: std::sync::atomic::AtomicBool::new(false),
            fail_next_write: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn seed_holding(&self, addr: u16, value: u16) {
        self.state.lock().await.holding.insert(addr, value);
    }

    pub async fn seed_coil(&self, addr: u16, value: bool) {
        self.state.lock().await.coils.insert(addr, value);
    }
}

impl Default for MockPlcTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseService for MockPlcTransport {
    fn service_name(&self) -> &'static str {
        "MockPlcTransport"
    }

    async fn initialize(&mut self) -> AppResult<()> {
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        self.state.lock().await.connected = false;
        Ok(())
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl PlcTransport for MockPlcTransport {
    async fn connect(&self) -> AppResult<()> {
        self.state.lock().await.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.state.lock().await.connected = false;
        Ok(())
    }

    fn connection_status(&self) -> PlcConnectionStatus {
        PlcConnectionStatus::Connected { endpoint: "mock".to_string() }
    }

    async fn read_holding(&self, addr: u16, count: u16) -> AppResult<Vec<u16>> {
        if self.fail_next_read.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::transport_transient("mock induced read failure"));
        }
        let state = self.state.lock().await;
        Ok((addr..addr + count).map(|a| *state.holding.get(&a).unwrap_or(&0)).collect())
    }

    async fn write_holding(&self, addr: u16, values: &[u16]) -> AppResult<()> {
        if self.fail_next_write.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::transport_transient("mock induced write failure"));
        }
        let mut state = self.state.lock().await;
        for (i, v) in values.iter().enumerate() {
            state.holding.insert(addr + i as u16, *v);
        }
        Ok(())
    }

    async fn read_coils(&self, addr: u16, count: u16) -> AppResult<Vec<bool>> {
        if self.fail_next_read.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::transport_transient("mock induced read failure"));
        }
        let state = self.state.lock().await;
        Ok((addr..addr + count).map(|a| *state.coils.get(&a).unwrap_or(&false)).collect())
    }

    async fn write_coil(&self, addr: u16, value: bool) -> AppResult<()> {
        if self.fail_next_write.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::transport_transient("mock induced write failure"));
        }
        self.state.lock().await.coils.insert(addr, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ByteOrder;

    #[tokio::test]
    async fn float32_write_then_read_round_trips_through_codec() {
        let transport = MockPlcTransport::new();
        transport.write_float32(100, 37.5, ByteOrder::Badc).await.unwrap();
        let value = transport.read_float32(100, ByteOrder::Badc).await.unwrap();
        assert_eq!(value, 37.5);
    }

    #[tokio::test]
    async fn induced_failure_surfaces_once() {
        let transport = MockPlcTransport::new();
        transport.fail_next_read();
        let err = transport.read_holding(0, 1).await.unwrap_err();
        assert!(err.is_retryable_transport());
        let ok = transport.read_holding(0, 1).await;
        assert!(ok.is_ok());
    }
}
