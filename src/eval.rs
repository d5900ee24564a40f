use std::convert::Infallible;
use std::ffi::{CString, NulError};
use std::io::{self, Write};
use std::mem;
use std::os::raw::c_char;
use std::ptr;

use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, warn};

use crate::builtin::{self, Builtin};
use crate::global::{Flow, State};
use crate::job::{self, JobBuilder, JobTable, WaitStatusExt};
use crate::plumbing::{IoError, PlumbingPlan};
use crate::types::{Pipeline, Stage};

/// Exit status of a child whose program could not be started.
pub const EXEC_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum LaunchError {
	#[error("pipeline has an empty command")]
	EmptyPipeline,
	#[error("argument contains a NUL byte: {0}")]
	InvalidArgument(#[from] NulError),
	#[error("cannot spawn stage {}: {source}", .stage + 1)]
	SpawnFailed {
		stage: usize,
		#[source]
		source: Errno,
		reaped: Vec<Pid>,
	},
	#[error("waiting for pipeline failed: {0}")]
	Wait(#[source] Errno),
}

#[derive(Debug, Error)]
pub enum EvalError {
	#[error(transparent)]
	Builtin(#[from] builtin::BuiltinError),
	#[error(transparent)]
	Io(#[from] IoError),
	#[error(transparent)]
	Launch(#[from] LaunchError),
}

/// Process creation, split out so resource exhaustion can be simulated.
pub trait Spawn {
	fn fork(&mut self) -> nix::Result<ForkResult>;
}

pub struct Fork;

impl Spawn for Fork {
	fn fork(&mut self) -> nix::Result<ForkResult> {
		// Apart from built-in stages, the child only makes async-signal-safe
		// calls before exec or _exit.
		unsafe { unistd::fork() }
	}
}

#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
	Foreground(Vec<WaitStatus>),
	Background(Pid),
}

/// Failures a child can hit between fork and exec.
#[derive(Debug, Clone, Copy)]
enum ChildError {
	Plumbing(Errno),
	Exec(Errno),
}

impl ChildError {
	fn message(self) -> &'static str {
		match self {
			ChildError::Plumbing(e) => e.desc(),
			ChildError::Exec(Errno::ENOENT) => "command not found",
			ChildError::Exec(e) => e.desc(),
		}
	}
}

/// Everything `execvp` needs, built before forking so the child does not
/// allocate.
struct Program {
	argv: Vec<CString>,
	argv_ptrs: Vec<*const c_char>,
	error_prefix: Vec<u8>,
}

impl Program {
	fn new(stage: &Stage) -> Result<Program, NulError> {
		let argv = stage.argv.iter().map(|a| CString::new(a.as_bytes())).collect::<Result<Vec<CString>, NulError>>()?;
		let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|a| a.as_ptr()).collect();
		argv_ptrs.push(ptr::null());
		let error_prefix = format!("pipesh: {}: ", stage.name()).into_bytes();
		Ok(Program { argv: argv, argv_ptrs: argv_ptrs, error_prefix: error_prefix })
	}

	fn name(&self) -> &str {
		self.argv[0].to_str().unwrap_or("?")
	}

	fn exec(&self) -> Result<Infallible, ChildError> {
		unsafe { libc::execvp(self.argv_ptrs[0], self.argv_ptrs.as_ptr()) };
		Err(ChildError::Exec(Errno::last()))
	}
}

fn write_fd(fd: libc::c_int, mut bytes: &[u8]) {
	while !bytes.is_empty() {
		let n = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
		if n <= 0 {
			return;
		}
		bytes = &bytes[n as usize ..];
	}
}

fn write_stderr(bytes: &[u8]) {
	write_fd(libc::STDERR_FILENO, bytes);
}

/// A built-in inside a pipeline, run by the child against its installed
/// stdout. `jobs` is a snapshot taken before forking.
fn run_builtin(func: Builtin, argv: &[String], jobs: &mut JobTable) -> i32 {
	let mut state = State { jobs: mem::take(jobs) };
	let mut out: Vec<u8> = vec![];
	let result = func(&mut state, argv, &mut out);
	write_fd(libc::STDOUT_FILENO, &out);
	match result {
		Ok(Flow::Continue(code)) => code,
		Ok(Flow::Exit) => 0,
		Err(e) => {
			write_stderr(format!("pipesh: {}\n", e).as_bytes());
			EXEC_FAILURE
		},
	}
}

type ChildBuiltin<'a> = Option<(Builtin, &'a [String], &'a mut JobTable)>;

fn start_stage(plan: &PlumbingPlan, stage: usize, program: &Program, builtin: ChildBuiltin) -> Result<i32, ChildError> {
	plan.install(stage).map_err(ChildError::Plumbing)?;
	if let Some((func, argv, jobs)) = builtin {
		return Ok(run_builtin(func, argv, jobs));
	}
	match program.exec()? {}
}

/// Runs in the forked child and never returns into the shell: either the
/// image is replaced or the child exits with the built-in's status or
/// `EXEC_FAILURE`.
fn exec_stage(plan: &PlumbingPlan, stage: usize, program: &Program, builtin: ChildBuiltin) -> ! {
	let code = match start_stage(plan, stage, program, builtin) {
		Ok(code) => code,
		Err(err) => {
			write_stderr(&program.error_prefix);
			write_stderr(err.message().as_bytes());
			write_stderr(b"\n");
			EXEC_FAILURE
		},
	};
	unsafe { libc::_exit(code) }
}

/// Forks one child per stage, wires it to its plumbing and waits for all of
/// them, or registers a background job and returns at once.
///
/// A fork failure stops stage creation; the stages already running are
/// waited on before the error is returned, so none is left as a zombie.
pub fn launch<S: Spawn + ?Sized>(pipeline: &Pipeline, mut plan: PlumbingPlan, jobs: &mut JobTable,
                                 spawner: &mut S) -> Result<Completion, LaunchError> {
	if pipeline.stages.is_empty() || pipeline.stages.iter().any(|s| s.argv.is_empty()) {
		return Err(LaunchError::EmptyPipeline);
	}
	let programs = pipeline.stages.iter().map(Program::new).collect::<Result<Vec<Program>, NulError>>()?;
	let builtins: Vec<Option<Builtin>> = pipeline.stages.iter().map(|s| builtin::match_builtin(s.name())).collect();
	let mut child_jobs = if builtins.iter().any(Option::is_some) { jobs.snapshot() } else { JobTable::new() };
	debug!(stages = programs.len(), pipes = plan.pipe_count(), "launching");

	let mut job_builder = JobBuilder::new(programs.len());
	for (i, program) in programs.iter().enumerate() {
		match job_builder.push_fork(spawner) {
			Ok(ForkResult::Parent { child }) => {
				debug!(stage = i, pid = %child, program = program.name(), "spawned");
				plan.release(i);
			},
			Ok(ForkResult::Child) => {
				let builtin = match builtins[i] {
					Some(func) => Some((func, pipeline.stages[i].argv.as_slice(), &mut child_jobs)),
					None => None,
				};
				exec_stage(&plan, i, program, builtin)
			},
			Err(e) => {
				drop(plan);
				let reaped = job_builder.pids().to_vec();
				warn!(stage = i, error = %e, running = reaped.len(), "spawn failed, reaping started stages");
				let _ = job::wait_all(&reaped);
				return Err(LaunchError::SpawnFailed { stage: i, source: e, reaped: reaped });
			},
		}
	}
	drop(plan);

	if pipeline.is_background {
		let job = job_builder.build(pipeline.stages[0].name()).ok_or(LaunchError::EmptyPipeline)?;
		Ok(Completion::Background(jobs.register(job)))
	} else {
		let statuses = job::wait_all(job_builder.pids()).map_err(LaunchError::Wait)?;
		debug!(?statuses, "pipeline finished");
		Ok(Completion::Foreground(statuses))
	}
}

/// Runs a parsed line: a lone built-in runs in the shell itself, anything
/// else goes through plumbing and launch, where built-in stages run in
/// their child.
pub fn eval(state: &mut State, pipeline: &Pipeline, out: &mut dyn Write) -> Result<Flow, EvalError> {
	if let [stage] = pipeline.stages.as_slice() {
		if stage.input.is_none() && stage.output.is_none() && !pipeline.is_background {
			if let Some(func) = builtin::match_builtin(stage.name()) {
				return Ok(func(state, &stage.argv, out)?);
			}
		}
	}

	let plan = PlumbingPlan::plan(pipeline)?;
	match launch(pipeline, plan, &mut state.jobs, &mut Fork)? {
		Completion::Foreground(statuses) => {
			Ok(Flow::Continue(statuses.last().map_or(0, |s| s.code())))
		},
		Completion::Background(leader) => {
			let _ = writeln!(out, "[bg] {}", leader);
			let _ = out.flush();
			Ok(Flow::Continue(0))
		},
	}
}

/// Reports an error the way every failed line is reported.
pub fn report(e: &dyn std::error::Error) {
	let _ = writeln!(&mut io::stderr(), "pipesh: {}", e);
}
