use std::path::PathBuf;

use thiserror::Error;

use crate::types::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("missing file name after '{0}'")]
	MissingRedirectTarget(Operator),
	#[error("empty command")]
	EmptyCommand,
	#[error("'&' must be the last token")]
	MisplacedBackground,
}

type ParseResult<T> = Result<T, ParseError>;

struct Parser {
	tokens: Vec<Token>,
	i: usize,
}

impl Parser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.i)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.i).cloned();
		if token.is_some() {
			self.i += 1;
		}
		token
	}

	fn parse_redirect_target(&mut self, op: Operator) -> ParseResult<PathBuf> {
		match self.next() {
			Some(Token::Word(w)) => Ok(PathBuf::from(w)),
			_ => Err(ParseError::MissingRedirectTarget(op)),
		}
	}

	fn parse_stage(&mut self) -> ParseResult<Stage> {
		let mut argv: Vec<String> = vec![];
		let mut input = None;
		let mut output = None;

		loop {
			match self.peek() {
				None | Some(Token::Operator(Operator::Pipe)) | Some(Token::Operator(Operator::Background)) => { break; },
				_ => {},
			}
			match self.next() {
				Some(Token::Word(w)) => argv.push(w),
				Some(Token::Operator(op @ Operator::RedirectIn)) => {
					input = Some(self.parse_redirect_target(op)?);
				},
				Some(Token::Operator(op @ Operator::RedirectOut)) => {
					output = Some(self.parse_redirect_target(op)?);
				},
				_ => unreachable!(),
			}
		}

		if argv.is_empty() {
			return Err(ParseError::EmptyCommand);
		}
		Ok(Stage { argv: argv, input: input, output: output })
	}

	fn parse_pipeline(&mut self) -> ParseResult<Pipeline> {
		let mut stages: Vec<Stage> = vec![];
		let mut is_background = false;

		loop {
			stages.push(self.parse_stage()?);
			match self.next() {
				Some(Token::Operator(Operator::Pipe)) => {},
				Some(Token::Operator(Operator::Background)) => {
					if self.peek().is_some() {
						return Err(ParseError::MisplacedBackground);
					}
					is_background = true;
					break;
				},
				None => { break; },
				Some(_) => unreachable!(),
			}
		}
		Ok(Pipeline { stages: stages, is_background: is_background })
	}
}

/// Groups tokens into pipe-separated stages. Redirections are accepted on
/// any stage and the last one of each direction wins.
pub fn parse(tokens: Vec<Token>) -> ParseResult<Pipeline> {
	let mut parser = Parser { tokens: tokens, i: 0 };
	parser.parse_pipeline()
}
