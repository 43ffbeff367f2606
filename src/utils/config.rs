//! Process-wide configuration, assembled once from the environment at
//! startup. Deliberately not a global singleton: `AppConfig::from_env`
//! returns an owned value that callers wrap in an `Arc` and pass down,
//! rather than reaching for a module-level `static`/`OnceLock`.

use std::path::PathBuf;
use std::time::Duration;

use log::LevelFilter;
use uuid::Uuid;

use crate::models::enums::ByteOrder;

use super::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct PlcConfig {
    pub ip_address: Option<String>,
    pub port: u16,
    pub hostname: Option<String>,
    pub auto_discover: bool,
    pub slave_id: u8,
    pub byte_order: ByteOrder,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub machine_id: Uuid,
    pub plc: PlcConfig,
    pub sync_loop_hz: f64,
    pub dispatcher_poll_interval: Duration,
    pub database_url: String,
    pub log_level: LevelFilter,
    pub log_file_path: PathBuf,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn required(key: &str) -> AppResult<String> {
    env_var(key).ok_or_else(|| AppError::configuration(format!("missing required env var {key}")))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> AppResult<T> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::configuration(format!("invalid value for {key}: {raw}"))),
    }
}

impl AppConfig {
    /// Builds the configuration from environment variables named in the
    /// external-interfaces contract (`PLC_IP`, `PLC_PORT`, `PLC_HOSTNAME`,
    /// `PLC_AUTO_DISCOVER`, `PLC_SLAVE_ID`, `PLC_BYTE_ORDER`,
    /// `PLC_CONNECT_TIMEOUT_S`, `PLC_RETRIES`, `SYNC_LOOP_HZ`,
    /// `DISPATCHER_POLL_MS`, `MACHINE_ID`, `DATABASE_URL`, `LOG_LEVEL`,
    /// `LOG_FILE_PATH`). Fails fast with `AppError::Configuration` on the
    /// first invalid or missing required value.
    pub fn from_env() -> AppResult<Self> {
        let machine_id_raw = required("MACHINE_ID")?;
        let machine_id = Uuid::parse_str(&machine_id_raw)
            .map_err(|e| AppError::configuration(format!("invalid MACHINE_ID: {e}")))?;

        let database_url = required("DATABASE_URL")?;

        let port: u16 = parse_env("PLC_PORT", 502)?;
        if port == 0 {
            return Err(AppError::configuration("PLC_PORT must not be 0"));
        }

        let byte_order = match env_var("PLC_BYTE_ORDER") {
            None => ByteOrder::default(),
            Some(raw) => ByteOrder::parse(&raw).unwrap_or_else(|bad| {
                log::warn!("unrecognized PLC_BYTE_ORDER '{bad}', falling back to badc");
                ByteOrder::default()
            }),
        };

        let connect_timeout_s: u64 = parse_env("PLC_CONNECT_TIMEOUT_S", 10)?;
        let retries: u32 = parse_env("PLC_RETRIES", 3)?;
        let slave_id: u8 = parse_env("PLC_SLAVE_ID", 1)?;
        let auto_discover: bool = parse_env("PLC_AUTO_DISCOVER", false)?;

        let plc = PlcConfig {
            ip_address: env_var("PLC_IP"),
            port,
            hostname: env_var("PLC_HOSTNAME"),
            auto_discover,
            slave_id,
            byte_order,
            connect_timeout: Duration::from_secs(connect_timeout_s),
            operation_timeout: Duration::from_secs(3),
            retries,
        };

        let sync_loop_hz: f64 = parse_env("SYNC_LOOP_HZ", 1.0)?;
        if sync_loop_hz <= 0.0 {
            return Err(AppError::configuration("SYNC_LOOP_HZ must be > 0"));
        }

        let dispatcher_poll_ms: u64 = parse_env("DISPATCHER_POLL_MS", 500)?;

        let log_level_raw = env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_level = log_level_raw
            .parse::<LevelFilter>()
            .map_err(|_| AppError::configuration(format!("invalid LOG_LEVEL: {log_level_raw}")))?;

        let log_file_path = env_var("LOG_FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs/ald-control-agent.log"));

        Ok(AppConfig {
            machine_id,
            plc,
            sync_loop_hz,
            dispatcher_poll_interval: Duration::from_millis(dispatcher_poll_ms),
            database_url,
            log_level,
            log_file_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "MACHINE_ID", "DATABASE_URL", "PLC_IP", "PLC_PORT", "PLC_HOSTNAME",
            "PLC_AUTO_DISCOVER", "PLC_SLAVE_ID", "PLC_BYTE_ORDER", "PLC_CONNECT_TIMEOUT_S",
            "PLC_RETRIES", "SYNC_LOOP_HZ", "DISPATCHER_POLL_MS", "LOG_LEVEL", "LOG_FILE_PATH",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_machine_id_is_a_configuration_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/ald");
        let err = AppConfig::from_env().unwrap_err();
        assert_eq!(err.code(), "configuration");
    }

    #[test]
    fn zero_sync_loop_hz_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MACHINE_ID", Uuid::new_v4().to_string());
        std::env::set_var("DATABASE_URL", "postgres://localhost/ald");
        std::env::set_var("SYNC_LOOP_HZ", "0");
        let err = AppConfig::from_env().unwrap_err();
        assert_eq!(err.code(), "configuration");
    }

    #[test]
    fn unknown_byte_order_falls_back_to_badc() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MACHINE_ID", Uuid::new_v4().to_string());
        std::env::set_var("DATABASE_URL", "postgres://localhost/ald");
        std::env::set_var("PLC_BYTE_ORDER", "xyz");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.plc.byte_order, ByteOrder::Badc);
    }

    #[test]
    fn valid_config_parses_all_fields() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let machine_id = Uuid::new_v4();
        std::env::set_var("MACHINE_ID", machine_id.to_string());
        std::env::set_var("DATABASE_URL", "postgres://localhost/ald");
        std::env::set_var("PLC_HOSTNAME", "reactor-plc.local");
        std::env::set_var("PLC_BYTE_ORDER", "abcd");
        std::env::set_var("SYNC_LOOP_HZ", "2.0");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.machine_id, machine_id);
        assert_eq!(cfg.plc.hostname.as_deref(), Some("reactor-plc.local"));
        assert_eq!(cfg.plc.byte_order, ByteOrder::Abcd);
        assert_eq!(cfg.sync_loop_hz, 2.0);
    }
}
