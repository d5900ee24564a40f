use std::io::{self, Write};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::unistd::{self, Pid};
use thiserror::Error;

use crate::global::{Flow, State};
use crate::job::{JobError, JobState, WaitStatusExt};

#[derive(Debug, Error)]
pub enum BuiltinError {
	#[error("usage: {0}")]
	Usage(&'static str),
	#[error("cd: {}: {source}", .path.display())]
	Chdir {
		path: PathBuf,
		#[source]
		source: Errno,
	},
	#[error("fg: invalid job id: {0}")]
	InvalidJobId(String),
	#[error("fg: {0}")]
	Job(#[from] JobError),
	#[error(transparent)]
	Output(#[from] io::Error),
}

pub type Builtin = fn(&mut State, &[String], &mut dyn Write) -> Result<Flow, BuiltinError>;

pub fn builtin_cd(_: &mut State, argv: &[String], _: &mut dyn Write) -> Result<Flow, BuiltinError> {
	let path = match argv.get(1) {
		Some(dir) => PathBuf::from(dir),
		None => return Err(BuiltinError::Usage("cd <directory>")),
	};
	unistd::chdir(path.as_path()).map_err(|e| BuiltinError::Chdir { path: path.clone(), source: e })?;
	Ok(Flow::Continue(0))
}

pub fn builtin_jobs(state: &mut State, _: &[String], out: &mut dyn Write) -> Result<Flow, BuiltinError> {
	writeln!(out, "Active background jobs:")?;
	for job in state.jobs.list() {
		let label = match job.state() {
			JobState::Running => "Running",
			JobState::Done => "Done",
		};
		writeln!(out, "{}\t{}\t{}", job.leader, label, job.description)?;
	}
	Ok(Flow::Continue(0))
}

pub fn builtin_fg(state: &mut State, argv: &[String], out: &mut dyn Write) -> Result<Flow, BuiltinError> {
	let arg = match argv.get(1) {
		Some(arg) => arg,
		None => return Err(BuiltinError::Usage("fg <pid>")),
	};
	let leader = match arg.parse::<i32>() {
		Ok(n) if n > 0 => Pid::from_raw(n),
		_ => return Err(BuiltinError::InvalidJobId(arg.clone())),
	};
	if let Some(job) = state.jobs.get(leader) {
		writeln!(out, "{}\t{}", job.leader, job.description)?;
		out.flush()?;
	}
	let statuses = state.jobs.bring_foreground(leader)?;
	Ok(Flow::Continue(statuses.last().map_or(0, |s| s.code())))
}

pub fn builtin_exit(_: &mut State, _: &[String], _: &mut dyn Write) -> Result<Flow, BuiltinError> {
	Ok(Flow::Exit)
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"cd" => Some(builtin_cd),
		"jobs" => Some(builtin_jobs),
		"fg" => Some(builtin_fg),
		"exit" => Some(builtin_exit),
		_ => None,
	}
}
