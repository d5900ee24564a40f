use nix::errno::Errno;
use nix::sys::wait::{self, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{ForkResult, Pid};
use thiserror::Error;
use tracing::{info, warn};

use crate::eval::Spawn;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum JobState { Running, Done }

pub trait WaitStatusExt {
	fn code(self) -> i32;
}

impl WaitStatusExt for WaitStatus {
	fn code(self) -> i32 {
		match self {
			WaitStatus::Exited(_, code) => code,
			WaitStatus::Signaled(_, sig, _) => 128 + sig as i32,
			_ => 0,
		}
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
	#[error("no such job: {0}")]
	NotFound(Pid),
	#[error("waiting for job {pid} failed: {source}")]
	Wait {
		pid: Pid,
		#[source]
		source: Errno,
	},
}

/// Blocks until `pid` exits. Interrupts delivered to the shell do not
/// abandon the wait.
pub fn wait_for(pid: Pid) -> nix::Result<WaitStatus> {
	loop {
		match wait::waitpid(pid, None) {
			Err(Errno::EINTR) => {},
			r => return r,
		}
	}
}

/// Waits on every pid in order, even after a failure, and reports the
/// first failure once all of them have been collected.
pub fn wait_all(pids: &[Pid]) -> nix::Result<Vec<WaitStatus>> {
	let mut statuses = Vec::with_capacity(pids.len());
	let mut first_err = None;
	for &pid in pids {
		match wait_for(pid) {
			Ok(status) => statuses.push(status),
			Err(e) => {
				warn!(%pid, error = %e, "wait failed");
				first_err.get_or_insert(e);
			},
		}
	}
	match first_err {
		Some(e) => Err(e),
		None => Ok(statuses),
	}
}

fn probe(pid: Pid) -> JobState {
	let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
	match wait::waitid(Id::Pid(pid), flags) {
		Ok(WaitStatus::StillAlive) => JobState::Running,
		_ => JobState::Done,
	}
}

/// A background pipeline. `leader` is the last stage; `pids` holds every
/// stage in spawn order, leader included.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Job {
	pub leader: Pid,
	pub pids: Vec<Pid>,
	pub description: String,
	frozen: Option<JobState>,
}

impl Job {
	/// Liveness without reaping: an exited stage stays waitable.
	pub fn state(&self) -> JobState {
		if let Some(state) = self.frozen {
			return state;
		}
		self.pids.iter().map(|&pid| probe(pid)).min().unwrap_or(JobState::Done)
	}
}

#[derive(Debug)]
pub struct JobBuilder {
	pids: Vec<Pid>,
}

impl JobBuilder {
	pub fn new(size_hint: usize) -> JobBuilder {
		JobBuilder { pids: Vec::with_capacity(size_hint) }
	}

	pub fn push_fork<S: Spawn + ?Sized>(&mut self, spawner: &mut S) -> nix::Result<ForkResult> {
		let r = spawner.fork()?;
		if let ForkResult::Parent { child } = r {
			self.pids.push(child);
		}
		Ok(r)
	}

	pub fn pids(&self) -> &[Pid] {
		&self.pids
	}

	pub fn build(self, description: &str) -> Option<Job> {
		let leader = *self.pids.last()?;
		Some(Job { leader: leader, pids: self.pids, description: description.to_owned(), frozen: None })
	}
}

/// Background jobs of one shell session, in registration order. Entries
/// leave only through `bring_foreground`; nothing reaps behind the
/// shell's back.
#[derive(Debug, Default)]
pub struct JobTable {
	jobs: Vec<Job>,
}

impl JobTable {
	pub fn new() -> JobTable {
		JobTable { jobs: vec![] }
	}

	pub fn register(&mut self, job: Job) -> Pid {
		let leader = job.leader;
		info!(%leader, description = %job.description, "job registered");
		self.jobs.push(job);
		leader
	}

	pub fn list(&self) -> &[Job] {
		&self.jobs
	}

	pub fn get(&self, leader: Pid) -> Option<&Job> {
		self.jobs.iter().find(|job| job.leader == leader)
	}

	/// Copy of the table with every state read now. A forked child sees
	/// the shell's jobs as non-children, so it reads these instead.
	pub fn snapshot(&self) -> JobTable {
		let jobs = self.jobs.iter().map(|job| Job { frozen: Some(job.state()), ..job.clone() }).collect();
		JobTable { jobs: jobs }
	}

	/// Blocks until every stage of the job led by `leader` has exited,
	/// then drops the entry. An unknown id changes nothing.
	pub fn bring_foreground(&mut self, leader: Pid) -> Result<Vec<WaitStatus>, JobError> {
		let idx = self.jobs.iter().position(|job| job.leader == leader).ok_or(JobError::NotFound(leader))?;
		let job = self.jobs.remove(idx);
		if job.frozen.is_some() {
			return Err(JobError::Wait { pid: leader, source: Errno::ECHILD });
		}
		let statuses = wait_all(&job.pids).map_err(|e| JobError::Wait { pid: leader, source: e })?;
		info!(%leader, "job reaped");
		Ok(statuses)
	}
}
