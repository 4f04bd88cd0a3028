use crate::ring_buffer::RingBuffer;
use std::io::{self, Write};

/// Mirrors every byte from the child to the live console, the durable log
/// and the in-memory tail.
///
/// Each byte reaches every sink before the next one is accepted, and both
/// writers are flushed per byte so nothing lingers in a user-space buffer if
/// the supervisor dies. The console is best effort: the first write failure
/// is logged and the console is dropped, while the log and the tail keep
/// receiving output.
pub struct OutputMultiplexer<'a, C: Write, L: Write> {
    console: Option<C>,
    log: L,
    tail: &'a mut RingBuffer,
    bytes: u64,
}

impl<'a, C: Write, L: Write> OutputMultiplexer<'a, C, L> {
    pub fn new(console: C, log: L, tail: &'a mut RingBuffer) -> Self {
        Self {
            console: Some(console),
            log,
            tail,
            bytes: 0,
        }
    }

    /// Returns an error only if the log rejected the byte. The tail and the
    /// console have already seen it by then.
    pub fn on_byte(&mut self, byte: u8) -> io::Result<()> {
        let buf = [byte];
        self.tail.push(byte);
        self.bytes += 1;

        if let Some(console) = self.console.as_mut() {
            if let Err(e) = console.write_all(&buf).and_then(|_| console.flush()) {
                tracing::warn!(error = %e, "console closed, output continues in the log only");
                self.console = None;
            }
        }

        self.log.write_all(&buf)?;
        self.log.flush()
    }

    /// Feed a chunk read from the pipe, one byte at a time.
    pub fn on_bytes(&mut self, chunk: &[u8]) -> io::Result<()> {
        chunk.iter().try_for_each(|&b| self.on_byte(b))
    }

    /// Total bytes mirrored so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn console_open(&self) -> bool {
        self.console.is_some()
    }
}
