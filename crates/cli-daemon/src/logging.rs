use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use anyhow::{Context, Result};
use log::{Level, LevelFilter};

/// Writes every record to the console and the operational log
struct Tee {
    console: io::Stderr,
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A console that went away must not stop the log file
        let _ = self.console.write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

/// `YYYY-MM-DD HH:MM:SS [LEVEL] message`
fn format_line(level: Level, message: impl fmt::Display) -> String {
    format!(
        "{} [{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        level,
        message
    )
}

/// Write one formatted record to `out`; error records also go to `errors`
fn emit<W: Write>(out: &mut W, errors: &Mutex<File>, level: Level, line: &str) -> io::Result<()> {
    if level == Level::Error {
        if let Ok(mut file) = errors.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }
    writeln!(out, "{}", line)
}

/// Install the global logger.
///
/// Filter is `info` (`debug` when `verbose`), then `RUST_LOG` on top.
pub fn init(encoder_log: &Path, error_log: &Path, verbose: bool) -> Result<()> {
    let tee = Tee {
        console: io::stderr(),
        file: open_append(encoder_log)?,
    };
    let errors = Arc::new(Mutex::new(open_append(error_log)?));

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Pipe(Box::new(tee)))
        .format(move |buf, record| {
            let line = format_line(record.level(), record.args());
            emit(buf, &errors, record.level(), &line)
        })
        .try_init()
        .context("Failed to install logger")
}
