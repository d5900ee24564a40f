use tracing::warn;

use crate::types::{Operator, Token};

const BACKGROUND: char = '&';

fn classify(word: &str) -> Token {
	match word {
		"<" => Token::Operator(Operator::RedirectIn),
		">" => Token::Operator(Operator::RedirectOut),
		"|" => Token::Operator(Operator::Pipe),
		_ => Token::Word(word.to_owned()),
	}
}

/// Splits a line on ASCII whitespace. Operators are only recognized as
/// stand-alone words; `a>b` stays a single word. The first `&` ends the
/// line and turns into a trailing `Background` token, unless nothing
/// precedes it.
pub fn tokenize(line: &str) -> Vec<Token> {
	let (body, is_background) = match line.find(BACKGROUND) {
		Some(i) => {
			let rest = line[i + 1 ..].trim();
			if !rest.is_empty() {
				warn!(discarded = rest, "ignoring text after '&'");
			}
			(&line[.. i], true)
		},
		None => (line, false),
	};

	let mut tokens: Vec<Token> = body.split_ascii_whitespace().map(classify).collect();
	if is_background && !tokens.is_empty() {
		tokens.push(Token::Operator(Operator::Background));
	}
	tokens
}

/// Inverse of `tokenize` for tokens whose words carry no whitespace.
pub fn render(tokens: &[Token]) -> String {
	let words: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
	words.join(" ")
}
