//! Structured logging: a hand-written `log::Log` implementation rather than
//! a global `tracing` subscriber, in the style of the source lineage's
//! simple logger. Every record goes to stdout/stderr (color-coded by
//! level) and to an append-only, size-rotated log file. Command and
//! execution identifiers are folded into the message text at the call
//! site (`log::warn!("[command_id={}] ...", id)`) since `log` has no
//! structured key-value API without the unstable `kv` feature.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};

const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: u32 = 5;

struct RotatingFile {
    path: PathBuf,
    writer: BufWriter<File>,
    max_bytes: u64,
    max_files: u32,
    written: u64,
}

impl RotatingFile {
    fn open(path: PathBuf, max_bytes: u64, max_files: u32) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self { path, writer: BufWriter::new(file), max_bytes, max_files, written })
    }

    fn write_line(&mut self, line: &str) {
        if self.written + line.len() as u64 > self.max_bytes {
            self.rotate();
        }
        if self.writer.write_all(line.as_bytes()).is_ok() {
            self.written += line.len() as u64;
            let _ = self.writer.flush();
        }
    }

    /// Shifts `path.N` -> `path.N+1` down to `max_files`, then reopens a
    /// fresh empty file at `path`.
    fn rotate(&mut self) {
        let _ = self.writer.flush();
        for n in (1..self.max_files).rev() {
            let from = rotated_path(&self.path, n);
            let to = rotated_path(&self.path, n + 1);
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }
        let _ = std::fs::rename(&self.path, rotated_path(&self.path, 1));
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => {
                self.writer = BufWriter::new(file);
                self.written = 0;
            }
            Err(e) => eprintln!("log rotation failed to reopen {}: {e}", self.path.display()),
        }
    }
}

fn rotated_path(path: &Path, index: u32) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(format!(".{index}"));
    PathBuf::from(s)
}

pub struct StructuredLogger {
    level: LevelFilter,
    file: Option<Mutex<RotatingFile>>,
}

impl StructuredLogger {
    /// Builds the logger without installing it globally — useful for tests
    /// that want to exercise formatting without touching process state.
    pub fn new(level: LevelFilter, log_file_path: &Path) -> Self {
        let file = RotatingFile::open(log_file_path.to_path_buf(), DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_FILES)
            .map(Mutex::new)
            .map_err(|e| eprintln!("could not open log file {}: {e}", log_file_path.display()))
            .ok();
        Self { level, file }
    }

    /// Installs this logger as the process-wide `log` backend.
    pub fn install(level: LevelFilter, log_file_path: &Path) -> Result<(), log::SetLoggerError> {
        let logger = Self::new(level, log_file_path);
        log::set_max_level(level);
        log::set_boxed_logger(Box::new(logger))
    }

    fn console_line(record: &Record) -> String {
        format!(
            "{} {:<5} {} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl Log for StructuredLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::console_line(record);
        match record.level() {
            log::Level::Error => eprintln!("\x1b[31m{line}\x1b[0m"),
            log::Level::Warn => eprintln!("\x1b[33m{line}\x1b[0m"),
            log::Level::Debug | log::Level::Trace => println!("\x1b[90m{line}\x1b[0m"),
            log::Level::Info => println!("{line}"),
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                file.write_line(&format!("{line}\n"));
            }
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.writer.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rotates_once_max_bytes_is_exceeded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let mut file = RotatingFile::open(path.clone(), 64, 3).unwrap();
        for _ in 0..10 {
            file.write_line("0123456789\n");
        }
        assert!(rotated_path(&path, 1).exists());
    }

    #[test]
    fn disabled_levels_are_not_logged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let logger = StructuredLogger::new(LevelFilter::Warn, &path);
        assert!(!logger.enabled(&Metadata::builder().level(log::Level::Debug).target("x").build()));
        assert!(logger.enabled(&Metadata::builder().level(log::Level::Error).target("x").build()));
    }
}
