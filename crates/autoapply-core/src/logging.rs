//! Tracing setup for the two binaries: an `EnvFilter` plus a writer that copies
//! every line to a console stream and, optionally, to an append-only file.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "AUTOAPPLY_LOG_LEVEL";

/// Where console output goes. The dashboard prints its own lines to stdout,
/// so its diagnostics go to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub console: Console,
    pub dir: Option<PathBuf>,
    pub file_name: String,
}

impl LogSettings {
    /// `AUTOAPPLY_LOG_LEVEL`, then `debug` when asked for, then `info`.
    pub fn new(binary: &str, debug: bool, console: Console) -> Self {
        Self {
            level: resolve_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref(), debug),
            console,
            dir: None,
            file_name: format!("{binary}.log"),
        }
    }

    /// A blank directory keeps logging console-only.
    pub fn with_dir(mut self, dir: &str) -> Self {
        self.dir = (!dir.trim().is_empty()).then(|| PathBuf::from(dir));
        self
    }
}

fn resolve_level(env_level: Option<&str>, debug: bool) -> String {
    match env_level {
        Some(level) if !level.trim().is_empty() => level.trim().to_string(),
        _ if debug => "debug".to_string(),
        _ => "info".to_string(),
    }
}

/// Holds the shared file handle for the life of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl LogGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

struct TeeWriter {
    console: Console,
    file: Option<Arc<Mutex<File>>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = match self.console {
            Console::Stdout => io::stdout().write_all(buf),
            Console::Stderr => io::stderr().write_all(buf),
            Console::Off => Ok(()),
        };
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = match self.console {
            Console::Stdout => io::stdout().flush(),
            Console::Stderr => io::stderr().flush(),
            Console::Off => Ok(()),
        };
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(settings: &LogSettings) -> io::Result<Option<File>> {
    let Some(dir) = &settings.dir else {
        return Ok(None);
    };
    std::fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(&settings.file_name))
        .map(Some)
}

/// Installs the global subscriber. A log file that cannot be opened is
/// reported on stderr and logging continues console-only. `RUST_LOG` overrides
/// the resolved level.
pub fn init_logging(settings: &LogSettings) -> LogGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let file = match open_log_file(settings) {
        Ok(file) => file.map(|file| Arc::new(Mutex::new(file))),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    let console = settings.console;
    let shared = file.clone();
    let make_writer = BoxMakeWriter::new(move || TeeWriter {
        console,
        file: shared.clone(),
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish()
        .try_init();
    LogGuard { file }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_prefers_env_then_debug_flag() {
        assert_eq!(resolve_level(Some("warn"), true), "warn");
        assert_eq!(resolve_level(Some(" "), true), "debug");
        assert_eq!(resolve_level(None, false), "info");
    }

    #[test]
    fn file_copy_lands_under_the_binary_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = LogSettings::new("autoapply-portal", false, Console::Off)
            .with_dir(dir.path().to_str().expect("utf8 path"));
        let file = open_log_file(&settings).expect("open").expect("file");
        let mut writer = TeeWriter {
            console: Console::Off,
            file: Some(Arc::new(Mutex::new(file))),
        };
        writer.write_all(b"event=portal_start\n").expect("write");
        writer.flush().expect("flush");

        let contents = std::fs::read_to_string(dir.path().join("autoapply-portal.log"))
            .expect("log file");
        assert!(contents.contains("event=portal_start"));
    }

    #[test]
    fn blank_dir_means_console_only() {
        let settings = LogSettings::new("autoapply-dashboard", false, Console::Stderr).with_dir("  ");
        assert!(settings.dir.is_none());
        assert!(open_log_file(&settings).expect("open").is_none());
    }
}
