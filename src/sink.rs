//! Topic-keyed append log.
//!
//! Ingested messages are persisted to one file per topic per day under
//! the storage root: `{root}/{YYYY-MM-DD}/{topic}_{yyyymmdd}.dat`. Each
//! record is `[i32 monotonic offset][i32 value_length][value bytes]`,
//! big-endian, with the offset counted per topic per file. A writer that
//! outlives its day partition is flushed and reopened against the new
//! day's file on the next write.
//!
//! Writes are fire-and-forget: a dedicated writer thread consumes a
//! channel, buffers records per topic and flushes once the configured
//! threshold of pending records is exceeded (and on shutdown). Failures
//! are logged, never propagated to the caller.

use chrono::Local;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const MESSAGE_FILE_SUFFIX: &str = ".dat";
const DAY_DIR_FORMAT: &str = "%Y-%m-%d";

enum SinkJob {
    Write { key: Vec<u8>, value: Vec<u8> },
    Flush,
    Shutdown,
}

struct TopicWriter {
    out: BufWriter<File>,
    pending: Vec<Vec<u8>>,
    next_offset: i32,
    /// Day partition this writer was opened against.
    day: String,
}

impl TopicWriter {
    fn open(root: &PathBuf, topic: &str) -> std::io::Result<Self> {
        let day = Local::now().format(DAY_DIR_FORMAT).to_string();
        let day_dir = root.join(&day);
        fs::create_dir_all(&day_dir)?;
        let file_name = format!(
            "{}_{}{}",
            topic.to_lowercase(),
            Local::now().format("%Y%m%d"),
            MESSAGE_FILE_SUFFIX
        );
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(day_dir.join(file_name))?;
        Ok(Self {
            out: BufWriter::new(file),
            pending: Vec::new(),
            next_offset: 0,
            day,
        })
    }

    fn append(&mut self, value: Vec<u8>, flush_threshold: usize) -> std::io::Result<()> {
        self.pending.push(value);
        if self.pending.len() > flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for value in self.pending.drain(..) {
            self.next_offset += 1;
            self.out.write_all(&self.next_offset.to_be_bytes())?;
            self.out.write_all(&(value.len() as i32).to_be_bytes())?;
            self.out.write_all(&value)?;
        }
        self.out.flush()
    }
}

/// Narrow write interface handed to the message handler. Owns the writer
/// thread; dropping the manager flushes and joins it.
pub struct MessageWriterManager {
    tx: Sender<SinkJob>,
    worker: Option<JoinHandle<()>>,
}

impl MessageWriterManager {
    pub fn new(storage_path: PathBuf, flush_threshold: usize) -> Self {
        let (tx, rx) = mpsc::channel::<SinkJob>();

        let worker = thread::Builder::new()
            .name("message-writer".to_string())
            .spawn(move || {
                let mut writers: HashMap<String, TopicWriter> = HashMap::new();

                while let Ok(job) = rx.recv() {
                    match job {
                        SinkJob::Write { key, value } => {
                            handle_write(&mut writers, &storage_path, flush_threshold, &key, value);
                        }
                        SinkJob::Flush => {
                            for (topic, writer) in writers.iter_mut() {
                                if let Err(err) = writer.flush() {
                                    error!(topic, error = %err, "flush failed");
                                }
                            }
                        }
                        SinkJob::Shutdown => break,
                    }
                }

                for (topic, writer) in writers.iter_mut() {
                    if let Err(err) = writer.flush() {
                        error!(topic, error = %err, "final flush failed");
                    }
                }
                info!("message writer stopped");
            })
            .expect("failed to spawn message writer thread");

        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Enqueue one record. The topic is parsed from the JSON key by the
    /// writer thread; the call never blocks and never fails the caller.
    pub fn write(&self, key: &[u8], value: &[u8]) {
        let job = SinkJob::Write {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        if self.tx.send(job).is_err() {
            error!("message writer is gone, record dropped");
        }
    }

    /// Ask the writer thread to flush all pending records.
    pub fn flush(&self) {
        let _ = self.tx.send(SinkJob::Flush);
    }
}

impl Drop for MessageWriterManager {
    fn drop(&mut self) {
        let _ = self.tx.send(SinkJob::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!("message writer manager dropped");
    }
}

/// Route one record to its topic writer, rotating to a fresh file when
/// the day partition has rolled over since the writer was opened.
fn handle_write(
    writers: &mut HashMap<String, TopicWriter>,
    root: &PathBuf,
    flush_threshold: usize,
    key: &[u8],
    value: Vec<u8>,
) {
    let topic = match topic_from_key(key) {
        Some(topic) => topic,
        None => {
            warn!("message key carries no topic, record dropped");
            return;
        }
    };

    let today = Local::now().format(DAY_DIR_FORMAT).to_string();
    if writers.get(&topic).is_some_and(|w| w.day != today) {
        if let Some(mut stale) = writers.remove(&topic) {
            debug!(topic, day = %stale.day, "rotating topic writer to a new day");
            if let Err(err) = stale.flush() {
                error!(topic, error = %err, "flush before rotation failed");
            }
        }
    }

    let writer = match writers.entry(topic.clone()) {
        std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
        std::collections::hash_map::Entry::Vacant(e) => {
            match TopicWriter::open(root, &topic) {
                Ok(w) => e.insert(w),
                Err(err) => {
                    error!(topic, error = %err, "failed to open topic file");
                    return;
                }
            }
        }
    };
    if let Err(err) = writer.append(value, flush_threshold) {
        error!(topic, error = %err, "failed to append record");
    }
}

/// Pull the topic out of a JSON message key such as
/// `{"topic":"topic01","message_process_policy":"message_queue"}`.
pub fn topic_from_key(key: &[u8]) -> Option<String> {
    let json: JsonValue = serde_json::from_slice(key).ok()?;
    json.get("topic")?.as_str().map(str::to_string)
}
