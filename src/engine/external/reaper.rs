use std::process::Command;

use log::{debug, warn};
use parking_lot::Mutex;

/// Registry of external-tool process ids spawned on behalf of the engine.
///
/// Long-running refinement or evaluation tools sometimes outlive a failed
/// or interrupted call and keep file handles open, which can block a later
/// directory publish. The orchestrator reaps strays at run start, run end,
/// and before any directory publication.
#[derive(Debug, Default)]
pub struct ProcessReaper {
    pids: Mutex<Vec<u32>>,
}

impl ProcessReaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a spawned child. Dropping the returned guard (the normal
    /// exit path) untracks it; anything still tracked at a cleanup
    /// boundary is considered stray.
    pub fn register(&self, pid: u32) -> ReaperGuard<'_> {
        self.pids.lock().push(pid);
        ReaperGuard { reaper: self, pid }
    }

    pub fn tracked(&self) -> usize {
        self.pids.lock().len()
    }

    fn release(&self, pid: u32) {
        self.pids.lock().retain(|&p| p != pid);
    }

    /// Best-effort termination of every still-tracked process. Failures
    /// are logged and swallowed: the process may have exited on its own.
    pub fn kill_stray(&self) {
        let stray: Vec<u32> = std::mem::take(&mut *self.pids.lock());
        for pid in stray {
            debug!("reaping stray external process {}", pid);
            if let Err(e) = kill(pid) {
                warn!("failed to kill stray process {}: {}", pid, e);
            }
        }
    }
}

pub struct ReaperGuard<'a> {
    reaper: &'a ProcessReaper,
    pid: u32,
}

impl Drop for ReaperGuard<'_> {
    fn drop(&mut self) {
        self.reaper.release(self.pid);
    }
}

#[cfg(unix)]
fn kill(pid: u32) -> std::io::Result<()> {
    Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .output()
        .map(|_| ())
}

#[cfg(not(unix))]
fn kill(pid: u32) -> std::io::Result<()> {
    Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()
        .map(|_| ())
}
