//! Shared logging utilities for the Db2 for i MCP server.
//!
//! File logging splits records into per-level files (combined, error, warn,
//! info, debug) with size-based rotation. The stdio transport owns stdout as
//! its protocol channel, so console output goes to stderr and is suppressed
//! down to warnings there.

pub mod redact;

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "db2i=info,db2i_mcp=info,db2i_db=info,db2i_sql=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for the launcher.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Directory for log files; `None` disables file logging.
    pub logs_path: Option<&'a Path>,
    /// syslog-style level name from `MCP_LOG_LEVEL`, if set.
    pub level: Option<&'a str>,
    /// stdout carries the protocol; keep the console quiet.
    pub stdio_mode: bool,
}

/// Initialize tracing with per-level rolling file writers and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let directive = config
        .level
        .map(level_to_directive)
        .unwrap_or(DEFAULT_LOG_FILTER);

    let base_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let console_filter = if config.stdio_mode {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(console_filter),
    );

    match config.logs_path {
        Some(dir) => {
            let combined = level_layer(dir, config.app_name, "combined", LevelFilter::TRACE)?;
            let error = level_layer(dir, config.app_name, "error", LevelFilter::ERROR)?;
            let warn = level_layer(dir, config.app_name, "warn", LevelFilter::WARN)?;
            let info = level_layer(dir, config.app_name, "info", LevelFilter::INFO)?;
            let debug = level_layer(dir, config.app_name, "debug", LevelFilter::DEBUG)?;
            registry
                .with(combined.with_filter(base_filter))
                .with(error)
                .with(warn)
                .with(info)
                .with(debug)
                .init();
        }
        None => registry.init(),
    }

    Ok(())
}

/// Map a syslog-style level name to a tracing filter directive.
fn level_to_directive(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "info" | "notice" => "info",
        "warning" => "warn",
        "error" | "crit" | "alert" | "emerg" => "error",
        _ => DEFAULT_LOG_FILTER,
    }
}

type FileLayer<S> = tracing_subscriber::filter::Filtered<
    tracing_subscriber::fmt::Layer<
        S,
        tracing_subscriber::fmt::format::DefaultFields,
        tracing_subscriber::fmt::format::Format,
        SharedRollingWriter,
    >,
    LevelFilter,
    S,
>;

fn level_layer<S>(
    dir: &Path,
    app_name: &str,
    level_name: &str,
    filter: LevelFilter,
) -> Result<FileLayer<S>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let writer = SharedRollingWriter::new(
        dir.to_path_buf(),
        &format!("{}-{}", sanitize_name(app_name), level_name),
    )?;
    Ok(tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter))
}

struct RollingFileAppender {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn new(dir: PathBuf, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut appender = Self {
            dir,
            base_name: base_name.to_string(),
            max_files: max_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        let (file, size) = appender.open_current_file()?;
        appender.file = Some(file);
        appender.current_size = size;
        if appender.current_size > appender.max_size {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn open_current_file(&self) -> io::Result<(File, u64)> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base_name, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        self.rotate_files()?;

        let (file, size) = self.open_current_file()?;
        self.file = Some(file);
        self.current_size = size;
        Ok(())
    }

    fn rotate_files(&self) -> io::Result<()> {
        let max_index = self.max_files.saturating_sub(1);
        if max_index == 0 {
            return Ok(());
        }

        let oldest = self.rotated_path(max_index);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for idx in (1..max_index).rev() {
            let src = self.rotated_path(idx);
            if src.exists() {
                let dst = self.rotated_path(idx + 1);
                fs::rename(&src, &dst)?;
            }
        }

        let current = self.current_path();
        if current.exists() {
            let first = self.rotated_path(1);
            fs::rename(current, first)?;
        }

        Ok(())
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl SharedRollingWriter {
    fn new(dir: PathBuf, base_name: &str) -> Result<Self> {
        let appender = RollingFileAppender::new(dir, base_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct SharedRollingWriterGuard {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("db2i-mcp"), "db2i-mcp");
        assert_eq!(sanitize_name("a b/c"), "a_b_c");
    }

    #[test]
    fn test_level_to_directive() {
        assert_eq!(level_to_directive("DEBUG"), "debug");
        assert_eq!(level_to_directive("notice"), "info");
        assert_eq!(level_to_directive("warning"), "warn");
        assert_eq!(level_to_directive("crit"), "error");
    }

    #[test]
    fn test_rotation_keeps_bounded_files() {
        let dir = std::env::temp_dir().join(format!("db2i-log-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut appender = RollingFileAppender::new(dir.clone(), "test", 3, 64).unwrap();
        for _ in 0..20 {
            appender.write_all(&[b'x'; 32]).unwrap();
        }
        appender.flush().unwrap();

        let count = fs::read_dir(&dir).unwrap().count();
        assert!(count <= 3, "expected at most 3 files, found {count}");
        let _ = fs::remove_dir_all(&dir);
    }
}
