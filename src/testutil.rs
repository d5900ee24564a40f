use std::fs;
use std::sync::{Mutex, MutexGuard};

static PROCESS_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that fork, wait, change directory or count descriptors.
pub fn serial() -> MutexGuard<'static, ()> {
	PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn open_fds() -> usize {
	fs::read_dir("/proc/self/fd").map(|d| d.count()).unwrap_or(0)
}
