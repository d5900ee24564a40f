use std::fmt;
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operator { RedirectIn, RedirectOut, Pipe, Background }

impl Operator {
	pub fn symbol(self) -> &'static str {
		match self {
			Operator::RedirectIn => "<",
			Operator::RedirectOut => ">",
			Operator::Pipe => "|",
			Operator::Background => "&",
		}
	}
}

impl fmt::Display for Operator {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.symbol())
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Token {
	Word(String),
	Operator(Operator),
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Token::Word(ref w) => f.write_str(w),
			Token::Operator(op) => write!(f, "{}", op),
		}
	}
}

/// One segment of a pipeline. `argv[0]` is the program name and is never
/// missing once the parser has accepted the stage.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stage {
	pub argv: Vec<String>,
	pub input: Option<PathBuf>,
	pub output: Option<PathBuf>,
}

impl Stage {
	pub fn name(&self) -> &str {
		&self.argv[0]
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline {
	pub stages: Vec<Stage>,
	pub is_background: bool,
}
