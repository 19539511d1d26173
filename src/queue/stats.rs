use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::envelope::element::escape;

/// Number of memory snapshots kept; the oldest is evicted first.
pub const MEMORY_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub taken_at: SystemTime,
    pub physical_bytes: usize,
    pub virtual_bytes: usize,
    /// Tasks completed when the snapshot was taken
    pub tasks_completed: u64,
}

impl MemorySnapshot {
    /// Samples this process; `None` where the platform offers no figures.
    pub fn take(tasks_completed: u64) -> Option<Self> {
        let usage = memory_stats::memory_stats()?;
        Some(Self {
            taken_at: SystemTime::now(),
            physical_bytes: usage.physical_mem,
            virtual_bytes: usage.virtual_mem,
            tasks_completed,
        })
    }
}

#[derive(Debug)]
pub struct QueueStats {
    pub status: String,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    started_at: Instant,
    loaded_at: Option<Instant>,
    baseline: Option<MemorySnapshot>,
    history: VecDeque<MemorySnapshot>,
}

impl QueueStats {
    pub fn new(started_at: Instant) -> Self {
        Self {
            status: "Initializing".to_string(),
            tasks_processed: 0,
            tasks_failed: 0,
            started_at,
            loaded_at: None,
            baseline: None,
            history: VecDeque::with_capacity(MEMORY_HISTORY),
        }
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_processed + self.tasks_failed
    }

    pub fn record(&mut self, success: bool) {
        if success {
            self.tasks_processed += 1;
        } else {
            self.tasks_failed += 1;
        }
    }

    pub fn mark_loaded(&mut self, at: Instant, baseline: Option<MemorySnapshot>) {
        self.loaded_at = Some(at);
        self.baseline = baseline;
    }

    pub fn push_snapshot(&mut self, snapshot: MemorySnapshot) {
        if self.history.len() == MEMORY_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(snapshot);
    }

    pub fn history(&self) -> impl Iterator<Item = &MemorySnapshot> {
        self.history.iter()
    }

    pub fn baseline(&self) -> Option<MemorySnapshot> {
        self.baseline
    }

    /// Completed tasks per hour as of `now`.
    ///
    /// With `include_load` the clock starts when the queue started,
    /// otherwise when the engines finished loading. `None` until a task has
    /// completed.
    pub fn throughput_at(&self, include_load: bool, now: Instant) -> Option<f64> {
        let completed = self.tasks_completed();
        if completed == 0 {
            return None;
        }
        let since = if include_load {
            self.started_at
        } else {
            self.loaded_at?
        };
        let elapsed = now.saturating_duration_since(since).max(Duration::from_millis(1));
        Some(completed as f64 * 3600.0 / elapsed.as_secs_f64())
    }

    pub fn memory_table_html(&self) -> String {
        let mut html = String::from(
            "<table class=\"memory\">\n<tr><th>Time</th><th>Tasks</th><th>Physical (MB)</th><th>Virtual (MB)</th></tr>\n",
        );
        let rows = self
            .baseline
            .iter()
            .map(|s| ("baseline".to_string(), s))
            .chain(self.history.iter().map(|s| (unix_seconds(s.taken_at).to_string(), s)));
        for (label, snapshot) in rows {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{:.1}</td><td>{:.1}</td></tr>\n",
                escape(&label),
                snapshot.tasks_completed,
                megabytes(snapshot.physical_bytes),
                megabytes(snapshot.virtual_bytes)
            ));
        }
        html.push_str("</table>\n");
        html
    }
}

fn megabytes(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
