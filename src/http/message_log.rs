use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-endpoint directory of raw request/response dumps.
///
/// Each exchange is stored as `<unix-seconds>.<conn-id>.request` and a
/// matching `.response`. Write failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct MessageLog {
    dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    dir: PathBuf,
    name: String,
}

impl MessageLog {
    pub fn new(log_dir: &Path, endpoint: &str) -> Self {
        let endpoint: String = endpoint
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        Self {
            dir: log_dir.join(endpoint),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry(&self, conn_id: u64) -> LogEntry {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        LogEntry {
            dir: self.dir.clone(),
            name: format!("{}.{:06}", secs, conn_id),
        }
    }
}

impl LogEntry {
    pub async fn write_request(&self, bytes: &[u8]) {
        self.write("request", bytes).await;
    }

    pub async fn write_response(&self, bytes: &[u8]) {
        self.write("response", bytes).await;
    }

    pub fn path(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, kind))
    }

    async fn write(&self, kind: &str, bytes: &[u8]) {
        let path = self.path(kind);
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "cannot create message log directory");
            return;
        }
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            tracing::warn!(file = %path.display(), error = %e, "cannot write message log");
        }
    }
}
