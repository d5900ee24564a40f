use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::unistd;
use thiserror::Error;
use tracing::debug;

use crate::types::Pipeline;

const CREATE_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum IoError {
	#[error("cannot open {}: {source}", .path.display())]
	CannotOpen {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("cannot create pipe: {0}")]
	Pipe(#[source] nix::Error),
}

/// Descriptors one stage will install as its standard streams. `None`
/// means the stream is inherited from the shell.
#[derive(Debug, Default)]
struct StageIo {
	stdin: Option<OwnedFd>,
	stdout: Option<OwnedFd>,
}

impl StageIo {
	fn raw_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
		self.stdin.iter().chain(self.stdout.iter()).map(|fd| fd.as_raw_fd())
	}
}

/// Every descriptor a pipeline needs, each owned by exactly one stage.
/// Dropping the plan closes whatever has not been released yet.
#[derive(Debug)]
pub struct PlumbingPlan {
	stages: Vec<StageIo>,
	pipes: usize,
}

fn open_input(path: &Path) -> Result<OwnedFd, IoError> {
	OpenOptions::new()
		.read(true)
		.open(path)
		.map(OwnedFd::from)
		.map_err(|e| IoError::CannotOpen { path: path.to_owned(), source: e })
}

fn open_output(path: &Path) -> Result<OwnedFd, IoError> {
	OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.mode(CREATE_MODE)
		.open(path)
		.map(OwnedFd::from)
		.map_err(|e| IoError::CannotOpen { path: path.to_owned(), source: e })
}

impl PlumbingPlan {
	/// Opens every redirection target and allocates one pipe per adjacent
	/// stage pair. Nothing is spawned here, so a failure leaves no process
	/// behind, and descriptors opened so far are closed on return.
	pub fn plan(pipeline: &Pipeline) -> Result<PlumbingPlan, IoError> {
		let n = pipeline.stages.len();
		let mut stages: Vec<StageIo> = (0 .. n).map(|_| StageIo::default()).collect();

		for (io, stage) in stages.iter_mut().zip(&pipeline.stages) {
			if let Some(ref path) = stage.input {
				io.stdin = Some(open_input(path)?);
			}
			if let Some(ref path) = stage.output {
				io.stdout = Some(open_output(path)?);
			}
		}

		let mut pipes = 0;
		for i in 1 .. n {
			let (pipe_read, pipe_write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(IoError::Pipe)?;
			pipes += 1;
			// An explicit redirection beats the pipe; the unused end is dropped here.
			if stages[i - 1].stdout.is_none() {
				stages[i - 1].stdout = Some(pipe_write);
			}
			if stages[i].stdin.is_none() {
				stages[i].stdin = Some(pipe_read);
			}
		}

		let plan = PlumbingPlan { stages: stages, pipes: pipes };
		debug!(?plan, "plumbing ready");
		Ok(plan)
	}

	pub fn pipe_count(&self) -> usize {
		self.pipes
	}

	/// Parent side: closes the shell's copies of the descriptors handed to
	/// `stage` once that stage has been forked.
	pub fn release(&mut self, stage: usize) {
		if let Some(io) = self.stages.get_mut(stage) {
			*io = StageIo::default();
		}
	}

	/// Child side: installs the stage's endpoints as stdin/stdout and closes
	/// every plumbing descriptor still held, its own originals included.
	/// Only raw syscalls run here; nothing is dropped in the child.
	pub fn install(&self, stage: usize) -> nix::Result<()> {
		if let Some(io) = self.stages.get(stage) {
			if let Some(ref fd) = io.stdin {
				unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO)?;
			}
			if let Some(ref fd) = io.stdout {
				unistd::dup2(fd.as_raw_fd(), libc::STDOUT_FILENO)?;
			}
		}
		for fd in self.stages.iter().flat_map(|io| io.raw_fds()) {
			if fd > libc::STDERR_FILENO {
				unistd::close(fd)?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use crate::lexer::tokenize;
	use crate::parser::parse;
	use crate::testutil;

	fn pipeline(line: &str) -> Pipeline {
		parse(tokenize(line)).unwrap()
	}

	#[test]
	fn one_pipe_per_adjacent_pair() {
		let _guard = testutil::serial();
		for (line, expected) in &[("ls", 0), ("ls | wc", 1), ("a | b | c", 2), ("a | b | c | d | e", 4)] {
			let plan = PlumbingPlan::plan(&pipeline(line)).unwrap();
			assert_eq!(plan.pipe_count(), *expected, "{}", line);
			assert_eq!(plan.stages.len(), expected + 1);
		}
	}

	#[test]
	fn endpoints_are_assigned_to_neighbouring_stages() {
		let _guard = testutil::serial();
		let plan = PlumbingPlan::plan(&pipeline("a | b | c")).unwrap();
		assert!(plan.stages[0].stdin.is_none());
		assert!(plan.stages[0].stdout.is_some());
		assert!(plan.stages[1].stdin.is_some());
		assert!(plan.stages[1].stdout.is_some());
		assert!(plan.stages[2].stdin.is_some());
		assert!(plan.stages[2].stdout.is_none());
	}

	#[test]
	fn output_redirect_creates_and_truncates() {
		let _guard = testutil::serial();
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("out.txt");
		fs::write(&out, "old content").unwrap();

		let line = format!("echo hi > {}", out.display());
		let plan = PlumbingPlan::plan(&pipeline(&line)).unwrap();
		assert!(plan.stages[0].stdout.is_some());
		assert_eq!(fs::read(&out).unwrap(), b"");

		let fresh = dir.path().join("fresh.txt");
		let line = format!("echo hi > {}", fresh.display());
		PlumbingPlan::plan(&pipeline(&line)).unwrap();
		assert!(fresh.exists());
	}

	#[test]
	fn missing_input_file_aborts_the_plan() {
		let _guard = testutil::serial();
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("missing.txt");
		let out = dir.path().join("out.txt");
		let before = testutil::open_fds();

		let line = format!("cat < {} | wc > {}", missing.display(), out.display());
		match PlumbingPlan::plan(&pipeline(&line)) {
			Err(IoError::CannotOpen { path, .. }) => assert_eq!(path, missing),
			other => panic!("expected CannotOpen, got {:?}", other),
		}
		assert_eq!(testutil::open_fds(), before);
	}

	#[test]
	fn redirect_overrides_pipe_endpoint() {
		let _guard = testutil::serial();
		let dir = tempfile::tempdir().unwrap();
		let log = dir.path().join("log");
		let line = format!("a | b > {} | c", log.display());
		let plan = PlumbingPlan::plan(&pipeline(&line)).unwrap();
		assert_eq!(plan.pipe_count(), 2);
		assert!(plan.stages[1].stdout.is_some());
		assert!(plan.stages[2].stdin.is_some());
	}

	#[test]
	fn dropping_and_releasing_closes_everything() {
		let _guard = testutil::serial();
		let before = testutil::open_fds();
		for _ in 0 .. 16 {
			let mut plan = PlumbingPlan::plan(&pipeline("a | b | c | d")).unwrap();
			plan.release(0);
			plan.release(2);
		}
		assert_eq!(testutil::open_fds(), before);
	}
}
