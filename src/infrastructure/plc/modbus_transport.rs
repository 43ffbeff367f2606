//! Concrete `PlcTransport` over `tokio-modbus`'s TCP client. Endpoint
//! resolution (hostname, auto-discovery scan, static IP) and the
//! reconnect-on-transient-failure retry loop live here; the connection
//! state machine (`Disconnected -> Resolving -> Connected -> Faulted ->
//! Resolving -> ...`) keeps that retry behavior out of every call site.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context as ModbusContext};
use tokio_modbus::prelude::*;

use crate::domain::services::{BaseService, PlcConnectionStatus, PlcTransport};
use crate::utils::config::PlcConfig;
use crate::utils::error::{AppError, AppResult};

/// First 20 host addresses of each scanned /24, tried in order.
const DISCOVERY_HOSTS_PER_SUBNET: u8 = 20;
const DISCOVERY_SUBNETS: &[[u8; 3]] = &[[192, 168, 0], [192, 168, 1], [10, 0, 0]];
const DISCOVERY_PER_HOST_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

pub struct ModbusPlcTransport {
    config: PlcConfig,
    ctx: Mutex<Option<ModbusContext>>,
    status: std::sync::Mutex<PlcConnectionStatus>,
}

impl ModbusPlcTransport {
    pub fn new(config: PlcConfig) -> Self {
        Self {
            config,
            ctx: Mutex::new(None),
            status: std::sync::Mutex::new(PlcConnectionStatus::Disconnected),
        }
    }

    fn set_status(&self, status: PlcConnectionStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Tries to establish a live TCP Modbus session against `addr`, up to
    /// `self.config.retries` times, with a fixed back-off between attempts.
    async fn try_connect_addr(&self, addr: SocketAddr) -> AppResult<ModbusContext> {
        let slave = Slave(self.config.slave_id);
        let mut last_err = None;
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
            match tokio::time::timeout(self.config.connect_timeout, tcp::connect_slave(addr, slave)).await {
                Ok(Ok(ctx)) => return Ok(ctx),
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => last_err = Some("connect timed out".to_string()),
            }
        }
        Err(AppError::transport_transient(format!(
            "could not connect to {addr}: {}",
            last_err.unwrap_or_default()
        )))
    }

    async fn resolve_hostname(&self, hostname: &str) -> AppResult<SocketAddr> {
        let target = format!("{hostname}:{}", self.config.port);
        let mut addrs = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| AppError::transport_fatal(format!("DNS resolution failed for {hostname}: {e}")))?;
        addrs
            .next()
            .ok_or_else(|| AppError::transport_fatal(format!("no addresses found for {hostname}")))
    }

    /// Synchronous-feeling discovery: probes the first N hosts of a small
    /// set of common private /24s for a live TCP responder on the
    /// configured port, returning the first hit.
    async fn discover(&self) -> AppResult<SocketAddr> {
        for subnet in DISCOVERY_SUBNETS {
            for host in 1..=DISCOVERY_HOSTS_PER_SUBNET {
                let ip = IpAddr::V4(Ipv4Addr::new(subnet[0], subnet[1], subnet[2], host));
                let addr = SocketAddr::new(ip, self.config.port);
                if tokio::time::timeout(DISCOVERY_PER_HOST_TIMEOUT, TcpStream::connect(addr))
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false)
                {
                    return Ok(addr);
                }
            }
        }
        Err(AppError::transport_fatal("auto-discovery found no responding host"))
    }

    fn static_addr(&self) -> AppResult<SocketAddr> {
        let ip = self
            .config
            .ip_address
            .as_deref()
            .ok_or_else(|| AppError::transport_fatal("no static PLC_IP configured"))?;
        format!("{ip}:{}", self.config.port)
            .parse()
            .map_err(|e| AppError::transport_fatal(format!("invalid PLC_IP/port: {e}")))
    }

    /// Runs the resolution order of hostname -> auto-discovery -> static IP,
    /// returning the first address a live session was established against.
    async fn resolve_and_connect(&self) -> AppResult<(SocketAddr, ModbusContext)> {
        let mut attempts: Vec<AppResult<SocketAddr>> = Vec::new();

        if let Some(hostname) = self.config.hostname.clone() {
            attempts.push(self.resolve_hostname(&hostname).await);
        }
        if self.config.auto_discover {
            attempts.push(self.discover().await);
        }
        attempts.push(self.static_addr());

        let mut last_err = None;
        for addr_result in attempts {
            let addr = match addr_result {
                Ok(addr) => addr,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            match self.try_connect_addr(addr).await {
                Ok(ctx) => return Ok((addr, ctx)),
                Err(e) => last_err = Some(e),
            }
        }
        Err(AppError::transport_fatal(format!(
            "endpoint resolution exhausted all targets: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn classify_io_error(err: &std::io::Error) -> AppError {
        use std::io::ErrorKind::*;
        match err.kind() {
            BrokenPipe | ConnectionReset | ConnectionAborted | TimedOut | UnexpectedEof => {
                AppError::transport_transient(err.to_string())
            }
            _ => AppError::protocol(err.to_string()),
        }
    }

    fn classify_modbus_error(err: tokio_modbus::Error) -> AppError {
        match err {
            tokio_modbus::Error::Transport(io_err) => Self::classify_io_error(&io_err),
            tokio_modbus::Error::Protocol(p) => AppError::protocol(format!("{p:?}")),
        }
    }

    /// Runs `op` against the live context under the configured
    /// per-operation timeout; on a transient failure (including a timeout),
    /// attempts one reconnect through the full resolution order and retries
    /// `op` exactly once more. A second consecutive transient failure is
    /// surfaced as `transport_fatal`, not `transport_transient` — the retry
    /// budget is exhausted and the caller should treat the link as down
    /// rather than keep resubmitting.
    async fn with_retry<T, F>(&self, mut op: F) -> AppResult<T>
    where
        F: FnMut(&mut ModbusContext) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<T>> + Send + '_>>,
    {
        {
            let mut guard = self.ctx.lock().await;
            if let Some(ctx) = guard.as_mut() {
                match self.run_with_timeout(op(ctx)).await {
                    Ok(v) => return Ok(v),
                    Err(e) if !e.is_retryable_transport() && !matches!(e, AppError::TransportFatal { .. }) => {
                        return Err(e);
                    }
                    Err(_) => {}
                }
            }
        }

        self.set_status(PlcConnectionStatus::Resolving);
        let (addr, new_ctx) = self.resolve_and_connect().await?;
        self.set_status(PlcConnectionStatus::Connected { endpoint: addr.to_string() });
        let mut guard = self.ctx.lock().await;
        *guard = Some(new_ctx);
        let ctx = guard.as_mut().unwrap();
        self.run_with_timeout(op(ctx)).await.map_err(|e| {
            self.set_status(PlcConnectionStatus::Faulted { message: e.to_string() });
            if e.is_retryable_transport() {
                AppError::transport_fatal(format!("retry exhausted: {e}"))
            } else {
                e
            }
        })
    }

    /// Bounds a single Modbus operation future to `operation_timeout`;
    /// elapsing it is a `transport_transient` failure, same as a broken pipe.
    async fn run_with_timeout<T>(&self, fut: impl std::future::Future<Output = AppResult<T>>) -> AppResult<T> {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::transport_transient("Modbus operation timed out")),
        }
    }
}

#[async_trait]
impl BaseService for ModbusPlcTransport {
    fn service_name(&self) -> &'static str {
        "ModbusPlcTransport"
    }

    async fn initialize(&mut self) -> AppResult<()> {
        if let Err(e) = self.connect().await {
            log::warn!("initial PLC connection failed, will retry lazily: {e}");
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        self.disconnect().await
    }

    async fn health_check(&self) -> AppResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AppError::transport_transient("not connected"))
        }
    }
}

#[async_trait]
impl PlcTransport for ModbusPlcTransport {
    async fn connect(&self) -> AppResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.set_status(PlcConnectionStatus::Resolving);
        match self.resolve_and_connect().await {
            Ok((addr, ctx)) => {
                *self.ctx.lock().await = Some(ctx);
                self.set_status(PlcConnectionStatus::Connected { endpoint: addr.to_string() });
                Ok(())
            }
            Err(e) => {
                self.set_status(PlcConnectionStatus::Faulted { message: e.to_string() });
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> AppResult<()> {
        *self.ctx.lock().await = None;
        self.set_status(PlcConnectionStatus::Disconnected);
        Ok(())
    }

    fn connection_status(&self) -> PlcConnectionStatus {
        self.status.lock().unwrap().clone()
    }

    async fn read_holding(&self, addr: u16, count: u16) -> AppResult<Vec<u16>> {
        self.with_retry(|ctx| {
            Box::pin(async move {
                match ctx.read_holding_registers(addr, count).await {
                    Ok(Ok(values)) => Ok(values),
                    Ok(Err(exception)) => Err(AppError::protocol(format!("{exception:?}"))),
                    Err(err) => Err(Self::classify_modbus_error(err)),
                }
            })
        })
        .await
    }

    async fn write_holding(&self, addr: u16, values: &[u16]) -> AppResult<()> {
        let values = values.to_vec();
        self.with_retry(move |ctx| {
            let values = values.clone();
            Box::pin(async move {
                let result = if values.len() == 1 {
                    ctx.write_single_register(addr, values[0]).await
                } else {
                    ctx.write_multiple_registers(addr, &values).await
                };
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(exception)) => Err(AppError::protocol(format!("{exception:?}"))),
                    Err(err) => Err(Self::classify_modbus_error(err)),
                }
            })
        })
        .await
    }

    async fn read_coils(&self, addr: u16, count: u16) -> AppResult<Vec<bool>> {
        self.with_retry(|ctx| {
            Box::pin(async move {
                match ctx.read_coils(addr, count).await {
                    Ok(Ok(values)) => Ok(values),
                    Ok(Err(exception)) => Err(AppError::protocol(format!("{exception:?}"))),
                    Err(err) => Err(Self::classify_modbus_error(err)),
                }
            })
        })
        .await
    }

    async fn write_coil(&self, addr: u16, value: bool) -> AppResult<()> {
        self.with_retry(move |ctx| {
            Box::pin(async move {
                match ctx.write_single_coil(addr, value).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(exception)) => Err(AppError::protocol(format!("{exception:?}"))),
                    Err(err) => Err(Self::classify_modbus_error(err)),
                }
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PlcConfig {
        PlcConfig {
            ip_address: Some("127.0.0.1".to_string()),
            port: 15020,
            hostname: None,
            auto_discover: false,
            slave_id: 1,
            byte_order: crate::models::enums::ByteOrder::Badc,
            connect_timeout: Duration::from_millis(200),
            operation_timeout: Duration::from_millis(200),
            retries: 1,
        }
    }

    #[tokio::test]
    async fn connect_to_unreachable_static_ip_is_transport_fatal() {
        let transport = ModbusPlcTransport::new(base_config());
        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.code(), "transport_fatal");
        assert!(!transport.is_connected());
    }

    #[test]
    fn classifies_broken_pipe_as_transient() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        assert!(ModbusPlcTransport::classify_io_error(&err).is_retryable_transport());
    }

    #[test]
    fn classifies_other_io_errors_as_protocol() {
        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad frame");
        assert_eq!(ModbusPlcTransport::classify_io_error(&err).code(), "protocol");
    }
}
