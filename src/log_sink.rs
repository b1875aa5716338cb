//! Operator-facing log stream shared by the runner and the provisioning tool.
//!
//! The sink is cheap to clone so that subprocess reader tasks can forward
//! lines while the orchestrator continues writing its own phase messages.
//! Writes are line-oriented and best-effort: a failing target never aborts a
//! run.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Cloneable handle to the caller-supplied log target.
#[derive(Clone)]
pub struct LogSink {
    target: SharedWriter,
}

impl LogSink {
    /// Wraps any writer as a log sink.
    #[must_use]
    pub fn new(target: impl Write + Send + 'static) -> Self {
        Self {
            target: Arc::new(Mutex::new(Box::new(target))),
        }
    }

    /// Sink that writes to the process standard error stream.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Sink that discards everything written to it.
    #[must_use]
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// Creates an in-memory sink and a handle for reading back its contents.
    #[must_use]
    pub fn capture() -> (Self, CapturedLog) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Self::new(SharedBuffer {
            buffer: Arc::clone(&buffer),
        });
        (sink, CapturedLog { buffer })
    }

    /// Writes a single line, appending the trailing newline.
    pub fn line(&self, text: &str) {
        if let Ok(mut target) = self.target.lock() {
            writeln!(target, "{text}").ok();
            target.flush().ok();
        }
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}

/// Read handle for a sink created with [`LogSink::capture`].
#[derive(Clone, Debug, Default)]
pub struct CapturedLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLog {
    /// Returns everything written so far, decoded lossily as UTF-8.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

struct SharedBuffer {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .buffer
            .lock()
            .map_err(|err| io::Error::other(err.to_string()))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
