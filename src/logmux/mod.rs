//! Concurrent draining of container output into a shared sink.
//!
//! Every attached stream gets two threads: a reader that pulls lines off the
//! stream as fast as it produces them, and a delivery thread that hands them
//! to the sink. A bounded buffer sits between the two. When the sink falls
//! behind and the buffer fills, new lines are dropped and counted, so the
//! reader never waits on the sink and a slow stream never holds up another.

mod sink;

pub use sink::{LogSink, TracingSink};

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::thread::JoinHandle;

/// Lines buffered per stream before new ones are dropped.
pub const DEFAULT_BUFFER_LINES: usize = 1024;

/// Fans any number of output streams into one [`LogSink`].
#[derive(Clone)]
pub struct LogMux {
    sink: Arc<dyn LogSink>,
    buffer: usize,
}

impl Default for LogMux {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl LogMux {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            buffer: DEFAULT_BUFFER_LINES,
        }
    }

    pub fn with_buffer(mut self, lines: usize) -> Self {
        self.buffer = lines.max(1);
        self
    }

    /// Start draining `reader` until it ends or fails.
    pub fn attach<R>(&self, source: impl Into<String>, reader: R) -> LogWorker
    where
        R: Read + Send + 'static,
    {
        let source = source.into();
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::sync_channel::<String>(self.buffer);

        let reader_counters = Arc::clone(&counters);
        let reader = std::thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                match tx.try_send(line) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                        reader_counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // Counted last so `read` never runs ahead of `dropped`.
                reader_counters.read.fetch_add(1, Ordering::Release);
            }
        });

        let sink = Arc::clone(&self.sink);
        let delivery_counters = Arc::clone(&counters);
        let delivery_source = source.clone();
        let delivery = std::thread::spawn(move || {
            for line in rx {
                sink.write_line(&delivery_source, &line);
                delivery_counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
        });

        LogWorker {
            source,
            reader,
            delivery,
            counters,
        }
    }
}

#[derive(Default)]
struct Counters {
    read: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Line counts for one attached stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub read: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Handle to one attached stream.
///
/// Dropping the handle detaches it; the threads keep running until the
/// stream ends.
pub struct LogWorker {
    source: String,
    reader: JoinHandle<()>,
    delivery: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl LogWorker {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current counts; the worker may still be running.
    pub fn stats(&self) -> DrainStats {
        DrainStats {
            read: self.counters.read.load(Ordering::Acquire),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.delivery.is_finished()
    }

    /// Wait for the stream to end and every buffered line to reach the sink.
    pub fn join(self) -> DrainStats {
        let _ = self.reader.join();
        let _ = self.delivery.join();
        DrainStats {
            read: self.counters.read.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for LogWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWorker")
            .field("source", &self.source)
            .field("stats", &self.stats())
            .finish()
    }
}
