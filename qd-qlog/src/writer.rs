//! Background JSON-SEQ writer with a queue-plus-dedicated-thread design:
//! the connection hot path only ever pushes a task onto a channel, never
//! blocks on file I/O. Output uses qlog JSON Text Sequences framing: a
//! `0x1e` record separator, the pretty-printed JSON object, and a trailing
//! `0x0a`.
//!
//! A `Writer` is constructed with an explicit [`QlogConfig`] and handed to
//! every [`crate::trace::Trace`] an endpoint creates — there is no global
//! instance to reach for; sinks are injected at endpoint construction.

use crate::config::{CommonFields, QlogConfig, VantagePoint};
use crate::event::Event;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

const RECORD_SEPARATOR: u8 = 0x1e;
const LINE_FEED: u8 = 0x0a;
const MAX_BATCH: usize = 1000;

/// The single top-of-file record every qlog JSON-SEQ trace opens with.
#[derive(Debug, Serialize)]
struct LogFileHeader {
    file_schema: &'static str,
    serialization_format: &'static str,
    title: String,
    generated_at: String,
    trace: TraceHeader,
}

#[derive(Debug, Serialize)]
struct TraceHeader {
    vantage_point: VantagePointHeader,
    common_fields: CommonFieldsHeader,
}

#[derive(Debug, Serialize)]
struct VantagePointHeader {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct CommonFieldsHeader {
    protocol_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
}

enum WriteTask {
    Header {
        connection_id: String,
        header: LogFileHeader,
    },
    Event {
        connection_id: String,
        event: Event,
    },
    CloseConnection {
        connection_id: String,
    },
    Flush,
    Shutdown,
}

/// Running totals a `Writer` exposes for observability; never read from by
/// the write path itself.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub total_events_written: AtomicU64,
    pub total_bytes_written: AtomicU64,
}

/// Handle to the background writer thread. Cheap to clone — every clone
/// shares the same channel and thread.
#[derive(Clone)]
pub struct Writer {
    sender: Sender<WriteTask>,
    stats: Arc<WriterStats>,
    enabled: bool,
}

struct WriterThread {
    output_dir: PathBuf,
    flush_interval: Duration,
    files: HashMap<String, File>,
    stats: Arc<WriterStats>,
}

impl Writer {
    /// Spawns the background thread and returns a handle. If `config.enabled`
    /// is `false` the handle still exists but every call is a no-op — callers
    /// never need to branch on whether tracing is on.
    pub fn new(config: QlogConfig) -> Self {
        let stats = Arc::new(WriterStats::default());
        let enabled = config.enabled;
        let (sender, receiver) = mpsc::channel::<WriteTask>();

        if enabled {
            let _ = fs::create_dir_all(&config.output_dir);
            let mut thread_state = WriterThread {
                output_dir: config.output_dir.clone(),
                flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
                files: HashMap::new(),
                stats: Arc::clone(&stats),
            };
            std::thread::spawn(move || thread_state.run(receiver));
        }

        Writer {
            sender,
            stats,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub(crate) fn write_header(
        &self,
        connection_id: &str,
        vantage_point: VantagePoint,
        common_fields: &CommonFields,
    ) {
        if !self.enabled {
            return;
        }
        let header = LogFileHeader {
            file_schema: "urn:ietf:params:qlog:file:sequential",
            serialization_format: "application/qlog+json-seq",
            title: format!("qd-quic trace {connection_id}"),
            generated_at: chrono::Utc::now().to_rfc3339(),
            trace: TraceHeader {
                vantage_point: VantagePointHeader {
                    r#type: vantage_point.as_str(),
                },
                common_fields: CommonFieldsHeader {
                    protocol_type: common_fields.protocol_type.clone(),
                    group_id: common_fields.group_id.clone(),
                },
            },
        };
        let _ = self.sender.send(WriteTask::Header {
            connection_id: connection_id.to_string(),
            header,
        });
    }

    pub(crate) fn write_event(&self, connection_id: &str, event: Event) {
        if !self.enabled {
            return;
        }
        let _ = self.sender.send(WriteTask::Event {
            connection_id: connection_id.to_string(),
            event,
        });
    }

    pub fn close_connection(&self, connection_id: &str) {
        if !self.enabled {
            return;
        }
        let _ = self.sender.send(WriteTask::CloseConnection {
            connection_id: connection_id.to_string(),
        });
    }

    pub fn flush(&self) {
        if !self.enabled {
            return;
        }
        let _ = self.sender.send(WriteTask::Flush);
    }

    /// Signals the background thread to flush and exit. The thread is
    /// detached, not joined — callers that need to know the flush has
    /// landed should follow with a brief sleep or a `flush()` + stat check.
    /// No further events may be logged through this handle afterward (the
    /// channel's sender is consumed).
    pub fn shutdown(self) {
        if self.enabled {
            let _ = self.sender.send(WriteTask::Shutdown);
        }
    }
}

impl WriterThread {
    fn run(&mut self, receiver: std::sync::mpsc::Receiver<WriteTask>) {
        loop {
            let mut batch = Vec::with_capacity(MAX_BATCH);
            match receiver.recv_timeout(self.flush_interval) {
                Ok(task) => batch.push(task),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
            while batch.len() < MAX_BATCH {
                match receiver.try_recv() {
                    Ok(task) => batch.push(task),
                    Err(_) => break,
                }
            }

            let mut shutdown = false;
            for task in batch {
                match task {
                    WriteTask::Header { connection_id, header } => {
                        self.write_record(&connection_id, &header);
                    }
                    WriteTask::Event { connection_id, event } => {
                        self.write_record(&connection_id, &event);
                    }
                    WriteTask::CloseConnection { connection_id } => {
                        self.files.remove(&connection_id);
                    }
                    WriteTask::Flush => {
                        for file in self.files.values_mut() {
                            let _ = file.flush();
                        }
                    }
                    WriteTask::Shutdown => shutdown = true,
                }
            }
            if shutdown {
                for file in self.files.values_mut() {
                    let _ = file.flush();
                }
                return;
            }
        }
    }

    fn write_record(&mut self, connection_id: &str, record: &impl Serialize) {
        let Ok(json) = serde_json::to_string_pretty(record) else {
            return;
        };
        let file = match self.get_or_create_file(connection_id) {
            Some(f) => f,
            None => return,
        };
        let mut bytes_written = 0u64;
        if file.write_all(&[RECORD_SEPARATOR]).is_ok() {
            bytes_written += 1;
        }
        if file.write_all(json.as_bytes()).is_ok() {
            bytes_written += json.len() as u64;
        }
        if file.write_all(&[LINE_FEED]).is_ok() {
            bytes_written += 1;
        }
        self.stats.total_events_written.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(bytes_written, Ordering::Relaxed);
    }

    fn get_or_create_file(&mut self, connection_id: &str) -> Option<&mut File> {
        if !self.files.contains_key(connection_id) {
            let path = self.output_dir.join(format!("{connection_id}.qlog"));
            match File::create(&path) {
                Ok(f) => {
                    self.files.insert(connection_id.to_string(), f);
                }
                Err(e) => {
                    tracing::warn!(connection_id, error = %e, "failed to open qlog output file");
                    return None;
                }
            }
        }
        self.files.get_mut(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventData, PacketLost};
    use std::sync::atomic::Ordering;

    fn temp_dir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("qd-qlog-test-{label}-{}", std::process::id()));
        dir
    }

    #[test]
    fn disabled_config_never_spawns_a_thread_or_touches_disk() {
        let dir = temp_dir("disabled");
        let writer = Writer::new(QlogConfig {
            enabled: false,
            output_dir: dir.clone(),
            ..QlogConfig::default()
        });
        assert!(!writer.is_enabled());
        writer.write_header("conn-a", VantagePoint::Server, &CommonFields::quic());
        writer.flush();
        assert!(!dir.exists());
    }

    #[test]
    fn enabled_writer_produces_a_json_seq_file_with_header_and_event() {
        let dir = temp_dir("enabled");
        let writer = Writer::new(QlogConfig {
            enabled: true,
            output_dir: dir.clone(),
            flush_interval_ms: 5,
            ..QlogConfig::default()
        });
        writer.write_header("conn-b", VantagePoint::Client, &CommonFields::quic());
        writer.write_event(
            "conn-b",
            Event::new(
                1,
                EventData::PacketLost(PacketLost {
                    packet_number: 9,
                    packet_type: "1RTT".to_string(),
                    trigger: "pto_expired".to_string(),
                }),
            ),
        );
        writer.flush();
        writer.shutdown();

        // Give the background thread a moment to drain its channel and exit.
        std::thread::sleep(Duration::from_millis(50));

        let path = dir.join("conn-b.qlog");
        let contents = fs::read(&path).expect("qlog file should have been created");
        assert_eq!(contents[0], RECORD_SEPARATOR);
        let text = String::from_utf8(contents).unwrap();
        assert!(text.contains("urn:ietf:params:qlog:file:sequential"));
        assert!(text.contains("pto_expired"));
        assert!(text.matches(LINE_FEED as char).count() >= 2);

        let _ = fs::remove_dir_all(&dir);
    }
}
