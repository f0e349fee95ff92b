use crate::command::{Command, Pipeline, RedirectKind};
use crate::lexer::Token;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while turning one line into a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A closing quote (single or double) was not found.
    #[error("unterminated quote")]
    UnfinishedQuote,
    /// A `<` or `>` was not followed by a file name.
    #[error("syntax error: `{}` must be followed by a file name", .0.symbol())]
    MissingRedirectTarget(RedirectKind),
    #[error("line longer than {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("pipeline has more than {limit} commands")]
    TooManyStages { limit: usize },
    #[error("command has more than {limit} arguments")]
    TooManyArguments { limit: usize },
}

/// Size bounds enforced while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_line_len: usize,
    pub max_stages: usize,
    pub max_args: usize,
}

impl Limits {
    pub fn check_line(&self, line: &str) -> Result<(), ParseError> {
        if line.len() > self.max_line_len {
            Err(ParseError::LineTooLong {
                limit: self.max_line_len,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        crate::config::Config::default().limits()
    }
}

struct PipelineBuilder<'a> {
    tokens: &'a [Token],
    pos: usize,
    limits: Limits,
}

impl<'a> PipelineBuilder<'a> {
    fn new(tokens: &'a [Token], limits: Limits) -> Self {
        PipelineBuilder {
            tokens,
            pos: 0,
            limits,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a pipeline: command ('|' command)*
    fn parse_pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let mut pipeline = Pipeline::single(self.parse_command()?);

        while let Some(Token::Pipe) = self.peek() {
            self.consume();
            if pipeline.len() == self.limits.max_stages {
                return Err(ParseError::TooManyStages {
                    limit: self.limits.max_stages,
                });
            }
            pipeline.push(self.parse_command()?);
        }

        Ok(pipeline)
    }

    /// Parse a command: (word | redirect)* up to the next `|` or the end.
    ///
    /// A segment with no words yields a command with an empty `argv`; the
    /// job controller rejects it when the pipeline is launched.
    fn parse_command(&mut self) -> Result<Command, ParseError> {
        let mut command = Command::default();

        while let Some(token) = self.peek() {
            match token {
                Token::Pipe => break,
                Token::Word(word) => {
                    self.consume();
                    if command.argv.len() == self.limits.max_args {
                        return Err(ParseError::TooManyArguments {
                            limit: self.limits.max_args,
                        });
                    }
                    command.argv.push(word.clone());
                }
                Token::RedirectIn => {
                    self.consume();
                    let target = self.parse_redirect_target(RedirectKind::Input)?;
                    command.set_redirect(RedirectKind::Input, target);
                }
                Token::RedirectOut => {
                    self.consume();
                    let target = self.parse_redirect_target(RedirectKind::Output)?;
                    command.set_redirect(RedirectKind::Output, target);
                }
            }
        }

        Ok(command)
    }

    fn parse_redirect_target(&mut self, kind: RedirectKind) -> Result<PathBuf, ParseError> {
        match self.peek() {
            Some(Token::Word(target)) => {
                self.consume();
                Ok(PathBuf::from(target))
            }
            _ => Err(ParseError::MissingRedirectTarget(kind)),
        }
    }
}

/// Builds a [`Pipeline`] from the token stream of one line.
///
/// `|` closes the current command and starts a new one. `<` and `>` consume
/// the following word as the command's input or output file; neither the
/// operator nor the file name lands in `argv`. Mixing a redirection with a
/// pipe on the same side of one command is accepted, and the redirection
/// wins over the pipe.
pub fn parse_pipeline(tokens: &[Token], limits: &Limits) -> Result<Pipeline, ParseError> {
    PipelineBuilder::new(tokens, *limits).parse_pipeline()
}
