use std::io::Write;

use tracing::debug;

use crate::eval;
use crate::job::JobTable;
use crate::lexer;
use crate::parser;

/// What the read loop does after a line: keep going with the line's exit
/// code, or stop.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Flow {
	Continue(i32),
	Exit,
}

pub struct State {
	pub jobs: JobTable,
}

impl State {
	pub fn new() -> State {
		State { jobs: JobTable::new() }
	}

	/// Tokenizes, parses and evaluates one line. Errors are reported on
	/// stderr and never end the session.
	pub fn execute_line(&mut self, line: &str, out: &mut dyn Write) -> Flow {
		let tokens = lexer::tokenize(line);
		if tokens.is_empty() {
			return Flow::Continue(0);
		}
		debug!(tokens = %lexer::render(&tokens), "tokenized");

		let pipeline = match parser::parse(tokens) {
			Ok(p) => p,
			Err(e) => {
				eval::report(&e);
				return Flow::Continue(1);
			},
		};
		debug!(?pipeline, "parsed");

		match eval::eval(self, &pipeline, out) {
			Ok(flow) => flow,
			Err(e) => {
				eval::report(&e);
				Flow::Continue(1)
			},
		}
	}
}
