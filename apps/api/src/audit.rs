//! Best-effort audit log.
//!
//! Entries are JSON lines appended to a single file. Writing is never allowed to
//! affect a generation: every failure is swallowed after a debug trace.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    /// Full outbound provider request and the concatenated generated text.
    /// Contains user content and model output: treat the file as sensitive.
    ProviderExchange {
        at: DateTime<Utc>,
        provider: String,
        request: Value,
        response: String,
    },
    /// A generation that ended with the refusal sentence.
    /// `source` names where the instruction came from, never the full prompt.
    Refusal { at: DateTime<Utc>, source: String },
}

impl AuditEntry {
    pub fn exchange(provider: impl Into<String>, request: Value, response: String) -> Self {
        AuditEntry::ProviderExchange {
            at: Utc::now(),
            provider: provider.into(),
            request,
            response,
        }
    }

    pub fn refusal(source: impl Into<String>) -> Self {
        AuditEntry::Refusal {
            at: Utc::now(),
            source: source.into(),
        }
    }
}

/// Audit capability injected into the provider adapters and the generation handler.
///
/// `record` has no error channel on purpose: implementations must swallow failures.
pub trait AuditLog: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Used when `AI_DEBUG` is off.
pub struct NoopAuditLog;

impl AuditLog for NoopAuditLog {
    fn record(&self, _entry: &AuditEntry) {}
}

/// Appends entries to a file, one `write_all` per line on an append-mode handle,
/// so concurrent requests interleave whole lines only.
///
/// Inside a tokio runtime the write runs on the blocking pool and `record`
/// returns immediately; outside one it is written inline.
pub struct FileAuditLog {
    path: PathBuf,
}

impl FileAuditLog {
    /// Creates the parent directory up front; a failure here resurfaces on the
    /// first write and is swallowed there.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Err(e) = create_parent(&path) {
            debug!("audit log directory for {} unavailable: {e}", path.display());
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn append_line(path: &Path, line: &[u8]) -> io::Result<()> {
    let open = || OpenOptions::new().create(true).append(true).open(path);
    let mut file = match open() {
        Ok(file) => file,
        // Directory removed since start-up.
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            create_parent(path)?;
            open()?
        }
        Err(e) => return Err(e),
    };
    file.write_all(line)
}

fn write_or_trace(path: &Path, line: &[u8]) {
    if let Err(e) = append_line(path, line) {
        debug!("audit log write to {} failed: {e}", path.display());
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, entry: &AuditEntry) {
        let mut line = match serde_json::to_vec(entry) {
            Ok(line) => line,
            Err(e) => {
                debug!("audit entry could not be serialized: {e}");
                return;
            }
        };
        line.push(b'\n');

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let path = self.path.clone();
                handle.spawn_blocking(move || write_or_trace(&path, &line));
            }
            Err(_) => write_or_trace(&self.path, &line),
        }
    }
}

/// Keeps entries in memory so tests can assert on them.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingAuditLog {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
}

#[cfg(test)]
impl RecordingAuditLog {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl AuditLog for RecordingAuditLog {
    fn record(&self, entry: &AuditEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_file_audit_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.log");
        let log = FileAuditLog::new(&path);

        log.record(&AuditEntry::refusal("skill:summary"));
        log.record(&AuditEntry::exchange(
            "openai",
            json!({"model": "gpt-4o-mini"}),
            "Hello".to_string(),
        ));

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert!(matches!(first, AuditEntry::Refusal { ref source, .. } if source == "skill:summary"));

        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["kind"], "provider_exchange");
        assert_eq!(second["response"], "Hello");
        assert_eq!(second["request"]["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_file_audit_log_swallows_write_failures() {
        let dir = tempfile::tempdir().unwrap();
        // The target is a directory, so opening it for append fails.
        let log = FileAuditLog::new(dir.path());
        log.record(&AuditEntry::refusal("mode:generate"));
        assert!(dir.path().is_dir());
    }

    #[test]
    fn test_concurrent_writers_never_split_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FileAuditLog::new(dir.path().join("audit.log")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        log.record(&AuditEntry::refusal(format!("prompt:{i}-{j}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            serde_json::from_str::<AuditEntry>(line).expect("every line is a whole entry");
        }
    }

    #[tokio::test]
    async fn test_record_inside_runtime_writes_off_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.log");
        let log = FileAuditLog::new(&path);
        assert!(dir.path().join("logs").is_dir());

        log.record(&AuditEntry::refusal("mode:improve"));

        for _ in 0..200 {
            if let Ok(contents) = fs::read_to_string(&path) {
                if contents.ends_with('\n') {
                    let entry: AuditEntry = serde_json::from_str(contents.trim_end()).unwrap();
                    assert!(matches!(entry, AuditEntry::Refusal { ref source, .. } if source == "mode:improve"));
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("audit entry was never written");
    }
}
