//! Line-prefixing output plumbing.
//!
//! Output from concurrently running containers is interleaved on shared
//! stdout/stderr sinks; every line carries a `[job-container] ` prefix so the
//! interleaving stays readable.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// A writer shared between the executor and its per-container prefixers.
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Wrap any writer for use as an executor output sink.
pub fn shared_writer<W: Write + Send + 'static>(writer: W) -> SharedWriter {
    Arc::new(Mutex::new(writer))
}

/// Buffers incoming bytes and writes whole lines, each prefixed with
/// `[<job>-<container>] `. A trailing unterminated line is emitted by
/// [`LinePrefixWriter::finish`] (or on drop).
pub(crate) struct LinePrefixWriter {
    prefix: String,
    sink: SharedWriter,
    buf: Vec<u8>,
}

impl LinePrefixWriter {
    pub(crate) fn new(job: &str, container: &str, sink: SharedWriter) -> Self {
        Self {
            prefix: format!("[{job}-{container}] "),
            sink,
            buf: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(self.prefix.as_bytes());
            let _ = sink.write_all(line);
            let _ = sink.write_all(b"\n");
        }
    }

    /// Emit any buffered partial line.
    pub(crate) fn finish(&mut self) {
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.emit(&line);
        }
    }
}

impl Write for LinePrefixWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.emit(&line);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Ok(mut sink) = self.sink.lock() {
            sink.flush()?;
        }
        Ok(())
    }
}

impl Drop for LinePrefixWriter {
    fn drop(&mut self) {
        self.finish();
    }
}
