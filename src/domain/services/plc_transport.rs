use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::codec;
use crate::models::enums::ByteOrder;
use crate::utils::error::AppResult;

use super::BaseService;

/// First-class connection state machine, as called for by Design Note 9:
/// `Disconnected -> Resolving -> Connected -> Faulted -> Resolving -> ...`
/// so retry semantics live in one place instead of being smeared across
/// call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlcConnectionStatus {
    Disconnected,
    Resolving,
    Connected { endpoint: String },
    Faulted { message: String },
}

/// Single-producer Modbus-TCP transport: callers must serialize access
/// (implementations guard the socket with a mutex so concurrent callers
/// queue rather than interleave bytes on the wire).
#[async_trait]
pub trait PlcTransport: BaseService {
    /// Runs the endpoint resolution order (hostname, auto-discovery,
    /// static IP) until a live TCP session is established, or returns
    /// `TransportFatal` once every target has been exhausted.
    async fn connect(&self) -> AppResult<()>;

    async fn disconnect(&self) -> AppResult<()>;

    fn connection_status(&self) -> PlcConnectionStatus;

    fn is_connected(&self) -> bool {
        matches!(self.connection_status(), PlcConnectionStatus::Connected { .. })
    }

    async fn read_holding(&self, addr: u16, count: u16) -> AppResult<Vec<u16>>;

    async fn write_holding(&self, addr: u16, values: &[u16]) -> AppResult<()>;

    async fn read_coils(&self, addr: u16, count: u16) -> AppResult<Vec<bool>>;

    async fn write_coil(&self, addr: u16, value: bool) -> AppResult<()>;

    /// Composes `read_holding` with the codec to recover a 32-bit float.
    async fn read_float32(&self, addr: u16, order: ByteOrder) -> AppResult<f32> {
        let regs = self.read_holding(addr, 2).await?;
        Ok(codec::decode_float32([regs[0], regs[1]], order))
    }

    async fn write_float32(&self, addr: u16, value: f32, order: ByteOrder) -> AppResult<()> {
        let regs = codec::encode_float32(value, order);
        self.write_holding(addr, &regs).await
    }

    async fn read_i32(&self, addr: u16, order: ByteOrder) -> AppResult<i32> {
        let regs = self.read_holding(addr, 2).await?;
        Ok(codec::decode_i32([regs[0], regs[1]], order))
    }

    async fn write_i32(&self, addr: u16, value: i32, order: ByteOrder) -> AppResult<()> {
        let regs = codec::encode_i32(value, order);
        self.write_holding(addr, &regs).await
    }

    async fn read_i16(&self, addr: u16) -> AppResult<i16> {
        let regs = self.read_holding(addr, 1).await?;
        Ok(codec::decode_i16(regs[0]))
    }

    async fn write_i16(&self, addr: u16, value: i16) -> AppResult<()> {
        self.write_holding(addr, &[codec::encode_i16(value)]).await
    }
}
