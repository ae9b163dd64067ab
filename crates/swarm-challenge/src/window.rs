use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use swarm_core::constants::CHALLENGE_WINDOW_SECS;
use swarm_core::types::{TaskId, TimestampNs};
use swarm_core::{now_ns, SwarmError};

/// One task's challenge window.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WindowInfo {
    pub task_id: TaskId,
    pub opened_at_ns: TimestampNs,
    pub duration_seconds: u64,
    pub extended_count: u32,
}

impl WindowInfo {
    pub fn remaining_seconds(&self, now: TimestampNs) -> f64 {
        let elapsed = (now - self.opened_at_ns) as f64 / 1e9;
        (self.duration_seconds as f64 - elapsed).max(0.0)
    }

    pub fn is_open(&self, now: TimestampNs) -> bool {
        self.remaining_seconds(now) > 0.0
    }
}

/// Durable registry of challenge windows, opened at FINALIZE and extended
/// when a valid challenge lands.
pub struct ChallengeWindows {
    _db: sled::Db,
    tree: sled::Tree,
    lock: Mutex<()>,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

impl ChallengeWindows {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage)?;
        let tree = db.open_tree("challenge_windows").map_err(storage)?;
        Ok(Self {
            _db: db,
            tree,
            lock: Mutex::new(()),
        })
    }

    /// Open a window for `task_id`. Re-opening an existing window is a
    /// no-op returning the original — FINALIZE is idempotent and must not
    /// restart the clock.
    pub fn create_window(
        &self,
        task_id: &str,
        duration_seconds: Option<u64>,
    ) -> Result<WindowInfo, SwarmError> {
        let _guard = self.lock.lock().expect("window lock poisoned");
        if let Some(existing) = self.read(task_id)? {
            return Ok(existing);
        }
        let window = WindowInfo {
            task_id: task_id.to_string(),
            opened_at_ns: now_ns(),
            duration_seconds: duration_seconds.unwrap_or(CHALLENGE_WINDOW_SECS),
            extended_count: 0,
        };
        self.write(&window)?;
        info!(task_id, duration = window.duration_seconds, "challenge window opened");
        Ok(window)
    }

    pub fn get_window(&self, task_id: &str) -> Result<Option<WindowInfo>, SwarmError> {
        self.read(task_id)
    }

    pub fn is_window_open(&self, task_id: &str) -> Result<bool, SwarmError> {
        Ok(self
            .read(task_id)?
            .map(|w| w.is_open(now_ns()))
            .unwrap_or(false))
    }

    pub fn remaining_seconds(&self, task_id: &str) -> Result<Option<f64>, SwarmError> {
        Ok(self.read(task_id)?.map(|w| w.remaining_seconds(now_ns())))
    }

    /// Extend a window by `extension_seconds` (> 0), tracking how many
    /// times it has been extended.
    pub fn extend_window(
        &self,
        task_id: &str,
        extension_seconds: u64,
    ) -> Result<Option<WindowInfo>, SwarmError> {
        if extension_seconds == 0 {
            return Err(SwarmError::Other("extension must be positive".into()));
        }
        let _guard = self.lock.lock().expect("window lock poisoned");
        let Some(mut window) = self.read(task_id)? else {
            return Ok(None);
        };
        window.duration_seconds += extension_seconds;
        window.extended_count += 1;
        self.write(&window)?;
        info!(
            task_id,
            extension_seconds,
            total = window.duration_seconds,
            extensions = window.extended_count,
            "challenge window extended"
        );
        Ok(Some(window))
    }

    /// Drop a window (e.g. after final settlement). Returns whether one
    /// existed.
    pub fn close_window(&self, task_id: &str) -> Result<bool, SwarmError> {
        let _guard = self.lock.lock().expect("window lock poisoned");
        Ok(self.tree.remove(task_id.as_bytes()).map_err(storage)?.is_some())
    }

    /// Every window still open right now.
    pub fn open_windows(&self) -> Result<Vec<WindowInfo>, SwarmError> {
        let now = now_ns();
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(storage)?;
            let window: WindowInfo = bincode::deserialize(&bytes)
                .map_err(|e| SwarmError::Serialization(e.to_string()))?;
            if window.is_open(now) {
                out.push(window);
            }
        }
        Ok(out)
    }

    fn read(&self, task_id: &str) -> Result<Option<WindowInfo>, SwarmError> {
        match self.tree.get(task_id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn write(&self, window: &WindowInfo) -> Result<(), SwarmError> {
        let bytes =
            bincode::serialize(window).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.tree
            .insert(window.task_id.as_bytes(), bytes)
            .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_windows(name: &str) -> ChallengeWindows {
        let dir = std::env::temp_dir().join(format!("swarm_window_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        ChallengeWindows::open(&dir).unwrap()
    }

    #[test]
    fn fresh_window_is_open_for_default_duration() {
        let windows = temp_windows("fresh");
        let w = windows.create_window("t1", None).unwrap();
        assert_eq!(w.duration_seconds, CHALLENGE_WINDOW_SECS);
        assert!(windows.is_window_open("t1").unwrap());
        assert!(windows.remaining_seconds("t1").unwrap().unwrap() > 86_000.0);
    }

    #[test]
    fn zero_duration_window_is_closed() {
        let windows = temp_windows("zero");
        windows.create_window("t1", Some(0)).unwrap();
        assert!(!windows.is_window_open("t1").unwrap());
    }

    #[test]
    fn reopening_keeps_original_clock() {
        let windows = temp_windows("reopen");
        let first = windows.create_window("t1", Some(100)).unwrap();
        let second = windows.create_window("t1", Some(9_999)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn extension_accumulates() {
        let windows = temp_windows("extend");
        windows.create_window("t1", Some(100)).unwrap();
        let w = windows.extend_window("t1", 50).unwrap().unwrap();
        assert_eq!(w.duration_seconds, 150);
        assert_eq!(w.extended_count, 1);
        let w = windows.extend_window("t1", 50).unwrap().unwrap();
        assert_eq!(w.extended_count, 2);
    }

    #[test]
    fn unknown_task_has_no_window() {
        let windows = temp_windows("unknown");
        assert!(!windows.is_window_open("ghost").unwrap());
        assert!(windows.extend_window("ghost", 10).unwrap().is_none());
        assert!(!windows.close_window("ghost").unwrap());
    }
}
