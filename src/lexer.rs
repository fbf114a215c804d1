//! A module implementing lexical analysis (tokenization) for command lines.
//!
//! Words are separated by whitespace only; there is no quoting. A handful of
//! words are reserved as operators when they stand alone.

/// Characters that separate tokens.
const DELIMITERS: &[char] = &[' ', '\t', '\r', '\n', '\x07'];

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Any word that is not an operator: a program name, argument or filename.
    Word(String),
    /// The pipe operator, `|`.
    PipeOp,
    /// Input redirection symbol, `<`.
    RedirectLeft,
    /// Output redirection symbol, `>`.
    RedirectRight,
    /// Appending output redirection symbol, `>>`.
    RedirectAppend,
}

impl Token {
    fn classify(word: &str) -> Self {
        match word {
            "|" => Token::PipeOp,
            "<" => Token::RedirectLeft,
            ">" => Token::RedirectRight,
            ">>" => Token::RedirectAppend,
            _ => Token::Word(word.to_string()),
        }
    }

    /// Textual form of an operator token, used in diagnostics.
    pub fn operator(&self) -> Option<&'static str> {
        match self {
            Token::Word(_) => None,
            Token::PipeOp => Some("|"),
            Token::RedirectLeft => Some("<"),
            Token::RedirectRight => Some(">"),
            Token::RedirectAppend => Some(">>"),
        }
    }
}

/// Splits a line into tokens.
///
/// Operators are only recognized as standalone words, so `a|b` is a single
/// word. Runs of delimiters never produce empty tokens.
pub fn split_into_tokens(line: &str) -> Vec<Token> {
    line.split(DELIMITERS)
        .filter(|word| !word.is_empty())
        .map(Token::classify)
        .collect()
}
