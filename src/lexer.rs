//! Lexical analysis: turns one input line into the ordered token stream the
//! pipeline parser consumes.

use crate::parser::ParseError;

/// A token of one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A literal argument, with quotes and escapes already removed.
    Word(String),
    /// The pipe operator, `|`.
    Pipe,
    /// Input redirection symbol, `<`.
    RedirectIn,
    /// Output redirection symbol, `>`.
    RedirectOut,
}

impl Token {
    /// Classifies an unquoted run of text by its first character.
    pub fn classify(text: &str) -> Token {
        match text.as_bytes().first() {
            Some(b'|') => Token::Pipe,
            Some(b'<') => Token::RedirectIn,
            Some(b'>') => Token::RedirectOut,
            _ => Token::Word(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    fn make_tokens(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out)?,
                LexingState::ReadingWord => self.handle_word(ch, &mut out)?,
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch)?,
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote => {
                return Err(ParseError::UnfinishedQuote)
            }
            LexingState::ReadingWord => self.finish_word(&mut out),
            LexingState::Start => {}
        }

        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn is_separator(ch: char) -> bool {
        matches!(ch, ' ' | '\t' | '\n' | '\r')
    }

    fn is_operator(ch: char) -> bool {
        matches!(ch, '|' | '<' | '>')
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        out.push(Token::Word(std::mem::take(&mut self.buffer)));
        self.state = LexingState::Start;
    }

    /// A trailing backslash is kept literally.
    fn escaped(&mut self) -> char {
        self.read_char().unwrap_or('\\')
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<Token>) -> Result<(), ParseError> {
        match ch {
            c if Self::is_separator(c) => {}
            c if Self::is_operator(c) => out.push(Token::classify(c.encode_utf8(&mut [0; 4]))),
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                let c = self.escaped();
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
        Ok(())
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) -> Result<(), ParseError> {
        match ch {
            c if Self::is_separator(c) => self.finish_word(out),
            c if Self::is_operator(c) => {
                self.finish_word(out);
                out.push(Token::classify(c.encode_utf8(&mut [0; 4])));
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                let c = self.escaped();
                self.buffer.push(c);
            }
            c => self.buffer.push(c),
        }
        Ok(())
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) -> Result<(), ParseError> {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' => match self.read_char() {
                Some(c @ ('"' | '\\')) => self.buffer.push(c),
                Some(c) => {
                    self.buffer.push('\\');
                    self.buffer.push(c);
                }
                None => return Err(ParseError::UnfinishedQuote),
            },
            c => self.buffer.push(c),
        }
        Ok(())
    }
}

/// Performs lexical analysis on one input line.
///
/// Whitespace separates words; unquoted `|`, `<` and `>` are operator tokens
/// whether or not whitespace surrounds them. Quoting makes them literal.
pub fn split_into_tokens(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = LexingFSM::new(line);
    lexer.make_tokens()
}
