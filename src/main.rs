mod builtin;
mod eval;
mod global;
mod job;
mod lexer;
mod parser;
mod plumbing;
mod signal;
mod types;

#[cfg(test)]
mod testutil;

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use global::Flow;

const LOG_ENV: &str = "PIPESH_LOG";
const EXIT_NOTICE: &str = "Exiting pipesh...";

/// A small interactive shell: pipelines, redirections and background jobs.
#[derive(Parser, Debug)]
#[command(name = "pipesh", version)]
struct Cli {
	/// Run one line and exit with its status instead of reading input.
	#[arg(short = 'c', long = "command", value_name = "LINE")]
	command: Option<String>,

	/// Prompt shown before each line.
	#[arg(long, default_value = "pipesh> ")]
	prompt: String,

	/// Log at debug level unless PIPESH_LOG says otherwise.
	#[arg(short, long)]
	verbose: bool,
}

fn init_logging(verbose: bool) {
	let default = if verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn repl(state: &mut global::State, prompt: &str) -> anyhow::Result<()> {
	let mut rl = DefaultEditor::new().context("cannot start line editor")?;
	let mut stdout = io::stdout();
	loop {
		match rl.readline(prompt) {
			Ok(line) => {
				if line.trim().is_empty() {
					continue;
				}
				let _ = rl.add_history_entry(line.as_str());
				if state.execute_line(&line, &mut stdout) == Flow::Exit {
					break;
				}
			},
			Err(ReadlineError::Interrupted) => println!("Use 'exit' to quit the shell."),
			Err(ReadlineError::Eof) => break,
			Err(e) => return Err(e).context("cannot read line"),
		}
	}
	Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();
	init_logging(cli.verbose);
	if let Err(e) = signal::install_handlers() {
		warn!(error = %e, "cannot install signal handlers");
	}

	let mut state = global::State::new();
	if let Some(line) = cli.command {
		let code = match state.execute_line(&line, &mut io::stdout()) {
			Flow::Continue(code) => code,
			Flow::Exit => 0,
		};
		return Ok(ExitCode::from((code & 0xff) as u8));
	}

	repl(&mut state, &cli.prompt)?;
	println!("{}", EXIT_NOTICE);
	Ok(ExitCode::SUCCESS)
}
