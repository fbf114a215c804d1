use crate::expand::Expander;
use crate::lexer::{self, Token};
use thiserror::Error;

/// Upper bound on the number of arguments in one stage, program name included.
pub const MAX_ARGS: usize = 64;

/// One program invocation within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// `argv[0]` is the program name; never empty.
    pub args: Vec<String>,
    /// File that replaces standard input (`< path`).
    pub input: Option<String>,
    /// File that replaces standard output (`> path` or `>> path`).
    pub output: Option<String>,
    /// Whether `output` is opened for appending. Meaningless without `output`.
    pub append: bool,
}

impl StageSpec {
    pub fn program(&self) -> &str {
        &self.args[0]
    }
}

/// Stages connected by pipes, left to right.
///
/// The successor of a stage is simply the next element; the last stage has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<StageSpec>,
}

impl Pipeline {
    pub(crate) fn new(stages: Vec<StageSpec>) -> Self {
        debug_assert!(!stages.is_empty());
        Self { stages }
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn first(&self) -> &StageSpec {
        &self.stages[0]
    }

    /// The stage fed by the output of stage `index`, if any.
    pub fn successor(&self, index: usize) -> Option<&StageSpec> {
        self.stages.get(index + 1)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Applies `f` to every argument and redirection path, producing a new pipeline.
    pub fn map_words(&self, mut f: impl FnMut(&str) -> String) -> Pipeline {
        let stages = self
            .stages
            .iter()
            .map(|stage| StageSpec {
                args: stage.args.iter().map(|a| f(a.as_str())).collect(),
                input: stage.input.as_deref().map(&mut f),
                output: stage.output.as_deref().map(&mut f),
                append: stage.append,
            })
            .collect();
        Pipeline { stages }
    }
}

/// Errors that can occur while turning a line into a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A redirection operator was the last token on the line.
    #[error("syntax error: expected file name after {operator}")]
    MissingRedirectTarget { operator: &'static str },
    /// A redirection operator was followed by another operator instead of a filename.
    #[error("syntax error: expected file name after {operator}, found {found}")]
    UnexpectedOperator {
        operator: &'static str,
        found: &'static str,
    },
    /// A stage has no program name, e.g. `| ls` or `< in.txt`.
    #[error("syntax error: missing command")]
    EmptyStage,
    /// A stage has more than [`MAX_ARGS`] arguments.
    #[error("too many arguments (limit is {limit})")]
    TooManyArguments { limit: usize },
}

struct PipelineBuilder<'a> {
    tokens: Vec<Token>,
    pos: usize,
    expander: &'a dyn Expander,
}

impl<'a> PipelineBuilder<'a> {
    fn new(tokens: Vec<Token>, expander: &'a dyn Expander) -> Self {
        Self {
            tokens,
            pos: 0,
            expander,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a pipeline: stage ('|' stage)* '|'?
    fn build(mut self) -> Result<Pipeline, ParseError> {
        let mut stages = vec![self.parse_stage()?];

        while let Some(Token::PipeOp) = self.consume() {
            // A trailing pipe simply ends the pipeline.
            if self.peek().is_none() {
                break;
            }
            stages.push(self.parse_stage()?);
        }

        Ok(Pipeline::new(stages))
    }

    /// Parse a stage: (word | redirect)* up to the next '|' or end of line.
    fn parse_stage(&mut self) -> Result<StageSpec, ParseError> {
        let mut stage = StageSpec {
            args: Vec::new(),
            input: None,
            output: None,
            append: false,
        };

        while let Some(token) = self.peek() {
            match token {
                Token::PipeOp => break,
                Token::Word(word) => {
                    let word = word.clone();
                    self.pos += 1;
                    for arg in self.expander.expand(&word) {
                        if stage.args.len() == MAX_ARGS {
                            return Err(ParseError::TooManyArguments { limit: MAX_ARGS });
                        }
                        stage.args.push(arg);
                    }
                }
                Token::RedirectLeft => {
                    stage.input = Some(self.parse_redirect_target()?);
                }
                Token::RedirectRight => {
                    stage.output = Some(self.parse_redirect_target()?);
                    stage.append = false;
                }
                Token::RedirectAppend => {
                    stage.output = Some(self.parse_redirect_target()?);
                    stage.append = true;
                }
            }
        }

        if stage.args.is_empty() {
            return Err(ParseError::EmptyStage);
        }
        Ok(stage)
    }

    /// Consumes a redirection operator and the filename after it. Filenames are not expanded.
    fn parse_redirect_target(&mut self) -> Result<String, ParseError> {
        let operator = self
            .consume()
            .and_then(|t| t.operator())
            .unwrap_or("redirection");
        match self.consume() {
            Some(Token::Word(path)) => Ok(path),
            Some(other) => Err(ParseError::UnexpectedOperator {
                operator,
                found: other.operator().unwrap_or("word"),
            }),
            None => Err(ParseError::MissingRedirectTarget { operator }),
        }
    }
}

/// Parses one command line into a [`Pipeline`].
///
/// Returns `Ok(None)` for an empty or whitespace-only line. Argument words go
/// through `expander`; redirection targets are taken literally.
pub fn parse(line: &str, expander: &dyn Expander) -> Result<Option<Pipeline>, ParseError> {
    let tokens = lexer::split_into_tokens(line);
    if tokens.is_empty() {
        return Ok(None);
    }
    let pipeline = PipelineBuilder::new(tokens, expander).build()?;
    log::debug!("parsed {} stage(s) from {line:?}", pipeline.len());
    Ok(Some(pipeline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::NoExpansion;

    fn parse_ok(line: &str) -> Pipeline {
        parse(line, &NoExpansion)
            .expect("parse failed")
            .expect("expected a pipeline")
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    struct Doubler;

    impl Expander for Doubler {
        fn expand(&self, word: &str) -> Vec<String> {
            if word == "*" {
                vec!["one".to_string(), "two".to_string()]
            } else {
                vec![word.to_string()]
            }
        }
    }

    #[test]
    fn test_simple_command_with_args() {
        let p = parse_ok("ls -l -a");
        assert_eq!(p.len(), 1);
        let stage = p.first();
        assert_eq!(stage.args, strings(&["ls", "-l", "-a"]));
        assert_eq!(stage.input, None);
        assert_eq!(stage.output, None);
        assert!(!stage.append);
        assert!(p.successor(0).is_none());
    }

    #[test]
    fn test_input_redirection() {
        let p = parse_ok("sort < input.txt");
        let stage = p.first();
        assert_eq!(stage.args, strings(&["sort"]));
        assert_eq!(stage.input.as_deref(), Some("input.txt"));
        assert_eq!(stage.output, None);
    }

    #[test]
    fn test_output_redirection_truncates() {
        let p = parse_ok("ls > output.txt");
        let stage = p.first();
        assert_eq!(stage.args, strings(&["ls"]));
        assert_eq!(stage.output.as_deref(), Some("output.txt"));
        assert!(!stage.append);
    }

    #[test]
    fn test_append_redirection() {
        let p = parse_ok("echo hi >> out.txt");
        let stage = p.first();
        assert_eq!(stage.args, strings(&["echo", "hi"]));
        assert_eq!(stage.output.as_deref(), Some("out.txt"));
        assert!(stage.append);
    }

    #[test]
    fn test_three_stages_in_order() {
        let p = parse_ok("a | b | c");
        assert_eq!(p.len(), 3);
        let names: Vec<&str> = p.stages().iter().map(|s| s.program()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(p.successor(0).map(|s| s.program()), Some("b"));
        assert_eq!(p.successor(1).map(|s| s.program()), Some("c"));
        assert!(p.successor(2).is_none());
    }

    #[test]
    fn test_n_stages_are_chained() {
        for n in 1..=8 {
            let line = (0..n).map(|i| format!("cmd{i}")).collect::<Vec<_>>().join(" | ");
            let p = parse_ok(&line);
            assert_eq!(p.len(), n);
            for i in 0..n {
                assert_eq!(p.stages()[i].program(), format!("cmd{i}"));
                if i + 1 < n {
                    assert_eq!(p.successor(i), Some(&p.stages()[i + 1]));
                }
            }
        }
    }

    #[test]
    fn test_combined_redirection_and_pipe() {
        let p = parse_ok("cat < input.txt | grep error > output.txt");
        assert_eq!(p.len(), 2);
        assert_eq!(p.stages()[0].input.as_deref(), Some("input.txt"));
        assert_eq!(p.stages()[0].output, None);
        assert_eq!(p.stages()[1].args, strings(&["grep", "error"]));
        assert_eq!(p.stages()[1].output.as_deref(), Some("output.txt"));
    }

    #[test]
    fn test_redirection_interleaved_with_arguments() {
        let p = parse_ok("sort < in.txt -r > out.txt -u");
        let stage = p.first();
        assert_eq!(stage.args, strings(&["sort", "-r", "-u"]));
        assert_eq!(stage.input.as_deref(), Some("in.txt"));
        assert_eq!(stage.output.as_deref(), Some("out.txt"));
    }

    #[test]
    fn test_last_redirection_wins() {
        let p = parse_ok("echo x >> a.txt > b.txt");
        assert_eq!(p.first().output.as_deref(), Some("b.txt"));
        assert!(!p.first().append);
    }

    #[test]
    fn test_empty_line_is_not_an_error() {
        assert_eq!(parse("", &NoExpansion), Ok(None));
        assert_eq!(parse("   \t ", &NoExpansion), Ok(None));
    }

    #[test]
    fn test_redirection_as_final_token_fails() {
        for line in [">", "<", ">>", "ls >", "sort <", "echo hi >>", "a | b >"] {
            assert!(
                matches!(
                    parse(line, &NoExpansion),
                    Err(ParseError::MissingRedirectTarget { .. })
                ),
                "{line:?} should fail"
            );
        }
    }

    #[test]
    fn test_redirection_followed_by_operator_fails() {
        assert_eq!(
            parse("ls > | wc", &NoExpansion),
            Err(ParseError::UnexpectedOperator {
                operator: ">",
                found: "|"
            })
        );
    }

    #[test]
    fn test_trailing_pipe_is_ignored() {
        let p = parse_ok("ls -l |");
        assert_eq!(p.len(), 1);
        assert_eq!(p.first().args, strings(&["ls", "-l"]));
    }

    #[test]
    fn test_missing_command_fails() {
        assert_eq!(parse("| ls", &NoExpansion), Err(ParseError::EmptyStage));
        assert_eq!(parse("a | | b", &NoExpansion), Err(ParseError::EmptyStage));
        assert_eq!(parse("< in.txt", &NoExpansion), Err(ParseError::EmptyStage));
    }

    #[test]
    fn test_too_many_arguments() {
        let ok = vec!["x"; MAX_ARGS].join(" ");
        assert_eq!(parse_ok(&ok).first().args.len(), MAX_ARGS);

        let too_many = vec!["x"; MAX_ARGS + 1].join(" ");
        assert_eq!(
            parse(&too_many, &NoExpansion),
            Err(ParseError::TooManyArguments { limit: MAX_ARGS })
        );
    }

    #[test]
    fn test_arguments_are_expanded_but_targets_are_not() {
        let p = parse("ls * > *", &Doubler).unwrap().unwrap();
        assert_eq!(p.first().args, strings(&["ls", "one", "two"]));
        assert_eq!(p.first().output.as_deref(), Some("*"));
    }

    #[test]
    fn test_expansion_counts_towards_limit() {
        let line = format!("{} *", vec!["x"; MAX_ARGS - 1].join(" "));
        assert_eq!(
            parse(&line, &Doubler),
            Err(ParseError::TooManyArguments { limit: MAX_ARGS })
        );
    }

    #[test]
    fn test_map_words_rewrites_args_and_paths() {
        let p = parse_ok("echo $x > $y");
        let mapped = p.map_words(|w| w.trim_start_matches('$').to_uppercase());
        assert_eq!(mapped.first().args, strings(&["ECHO", "X"]));
        assert_eq!(mapped.first().output.as_deref(), Some("Y"));
    }
}
