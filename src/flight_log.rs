//! Flight Logger: one append-only JSONL (optionally gzip-compressed) file per session,
//! bookended by SESSION_START/SESSION_END lines, plus the listing/read/delete helpers used to
//! browse logs after the fact.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize)]
pub enum EventType {
    #[serde(rename = "SESSION_START")]
    SessionStart,
    #[serde(rename = "SESSION_END")]
    SessionEnd,
    #[serde(rename = "COMMAND")]
    Command,
    #[serde(rename = "TELEMETRY")]
    Telemetry,
    #[serde(rename = "PARAMETER_CHANGE")]
    ParameterChange,
    #[serde(rename = "MODE_CHANGE")]
    ModeChange,
    #[serde(rename = "CONNECTION_CONNECTED")]
    ConnectionConnected,
    #[serde(rename = "CONNECTION_DISCONNECTED")]
    ConnectionDisconnected,
    #[serde(rename = "CONNECTION_FAILED")]
    ConnectionFailed,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    session_id: &'a str,
    connection_string: &'a str,
    event_type: EventType,
    data: Value,
}

enum Sink {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(file) => file.write(buf),
            Sink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(file) => file.flush(),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

pub struct FlightLogger {
    session_id: String,
    connection_string: String,
    path: PathBuf,
    sink: std::sync::Mutex<Sink>,
    started_at: Instant,
}

fn safe_conn(conn: &str) -> String {
    conn.replace(':', "_").replace('/', "_")
}

impl FlightLogger {
    /// Opens (creating the directory if absent) a new per-session log file and writes the
    /// opening `SESSION_START` line. `timestamp` is the ISO-8601 moment of construction,
    /// supplied by the caller (Session) rather than read from the system clock here, keeping
    /// this module free of a hidden time dependency.
    pub fn open(
        dir: &Path,
        connection_string: &str,
        session_id: &str,
        compress: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let stamp = now.format("%Y%m%d_%H%M%S");
        let extension = if compress { "jsonl.gz" } else { "jsonl" };
        let filename = format!("{stamp}_{}_{session_id}.{extension}", safe_conn(connection_string));
        let path = dir.join(filename);
        let file = File::create(&path)?;
        let sink = if compress {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        };

        let logger = Self {
            session_id: session_id.to_string(),
            connection_string: connection_string.to_string(),
            path,
            sink: std::sync::Mutex::new(sink),
            started_at: Instant::now(),
        };
        logger.write(EventType::SessionStart, serde_json::json!({ "start_time": now.to_rfc3339() }));
        Ok(logger)
    }

    /// Serializes one line, appends `\n`, flushes. Write errors are logged and swallowed —
    /// the logger must never break flight control.
    pub fn write(&self, event_type: EventType, data: Value) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            session_id: &self.session_id,
            connection_string: &self.connection_string,
            event_type,
            data,
        };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialize flight log entry");
                return;
            }
        };
        let mut sink = self.sink.lock().expect("flight log sink mutex poisoned");
        if let Err(err) = writeln!(sink, "{line}").and_then(|_| sink.flush()) {
            warn!(error = %err, path = %self.path.display(), "failed to write flight log entry");
        }
    }

    /// Emits `SESSION_END` with the elapsed duration. Consumes `self` so the file cannot be
    /// written to afterward.
    pub fn close(self) {
        let duration = self.started_at.elapsed().as_secs_f64();
        self.write(
            EventType::SessionEnd,
            serde_json::json!({
                "end_time": chrono::Utc::now().to_rfc3339(),
                "duration_seconds": duration,
            }),
        );
    }
}

/// One entry of `list_logs`: parsed from the filename grammar, best-effort.
#[derive(Debug, Clone, Serialize)]
pub struct LogFileInfo {
    pub filename: String,
    pub connection_string: String,
    pub session_id: String,
}

/// Lists `*.jsonl`/`*.jsonl.gz` files under `dir`, optionally filtered to one connection
/// string, parsing the grammar `{date}_{time}_{safe_conn}_{session_id}.jsonl[.gz]`
/// left-to-right (tokens[2..-1] re-joined and re-rendered as a connection string by turning
/// `_` back into `:`/`/` — best-effort).
pub fn list_logs(dir: &Path, connection_filter: Option<&str>) -> io::Result<Vec<LogFileInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        if let Some(info) = parse_log_filename(&filename) {
            let matches = match connection_filter {
                Some(wanted) => wanted == info.connection_string,
                None => true,
            };
            if matches {
                logs.push(info);
            }
        }
    }
    Ok(logs)
}

fn parse_log_filename(filename: &str) -> Option<LogFileInfo> {
    let stem = filename
        .strip_suffix(".jsonl.gz")
        .or_else(|| filename.strip_suffix(".jsonl"))?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return None;
    }
    let session_id = parts.last()?.to_string();
    let conn_tokens = &parts[2..parts.len() - 1];
    let connection_string = conn_tokens.join(":");
    Some(LogFileInfo {
        filename: filename.to_string(),
        connection_string,
        session_id,
    })
}

/// Reads up to `max_entries` JSON objects from a log file (transparently decompressing
/// `.gz`), returning `(entries, total_lines, truncated)`.
pub fn read_log(path: &Path, max_entries: usize) -> io::Result<(Vec<Value>, usize, bool)> {
    let file = File::open(path)?;
    let lines: Box<dyn BufRead> = if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        Box::new(BufReader::new(flate2::read::GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut entries = Vec::new();
    let mut total = 0usize;
    for line in lines.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        total += 1;
        if entries.len() < max_entries {
            if let Ok(value) = serde_json::from_str::<Value>(&line) {
                entries.push(value);
            }
        }
    }
    let truncated = total > entries.len();
    Ok((entries, total, truncated))
}

pub fn delete_log(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// Streams the raw file bytes (already-written format, compressed or not) for download.
pub fn read_log_bytes(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn filename_grammar_round_trips_connection_string() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FlightLogger::open(dir.path(), "udp:127.0.0.1:14550", "abc-123", false, sample_time())
            .unwrap();
        logger.close();

        let logs = list_logs(dir.path(), None).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].session_id, "abc-123");
        assert_eq!(logs[0].connection_string, "udp:127.0.0.1:14550");
    }

    #[test]
    fn session_start_then_end_bookend_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FlightLogger::open(dir.path(), "udp:A", "sess-1", false, sample_time()).unwrap();
        logger.write(EventType::Command, serde_json::json!({"name": "ARM", "success": true}));
        logger.close();

        let path = dir.path().join(
            list_logs(dir.path(), None).unwrap()[0].filename.clone(),
        );
        let (entries, total, truncated) = read_log(&path, 100).unwrap();
        assert_eq!(total, 3);
        assert!(!truncated);
        assert_eq!(entries[0]["event_type"], "SESSION_START");
        assert_eq!(entries[2]["event_type"], "SESSION_END");
        assert!(entries[2]["data"]["duration_seconds"].is_number());
    }

    #[test]
    fn gzip_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FlightLogger::open(dir.path(), "udp:A", "sess-2", true, sample_time()).unwrap();
        logger.close();
        let info = &list_logs(dir.path(), None).unwrap()[0];
        assert!(info.filename.ends_with(".jsonl.gz"));
        let (entries, total, _) = read_log(&dir.path().join(&info.filename), 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(entries[0]["event_type"], "SESSION_START");
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FlightLogger::open(dir.path(), "udp:A", "sess-3", false, sample_time()).unwrap();
        logger.close();
        let info = &list_logs(dir.path(), None).unwrap()[0];
        let path = dir.path().join(&info.filename);
        assert!(path.exists());
        delete_log(&path).unwrap();
        assert!(!path.exists());
    }
}
