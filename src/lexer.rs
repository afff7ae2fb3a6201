//! Lexical analysis of a single command line.
//!
//! Quoting follows a small subset of POSIX rules: a `'` or `"` opens a quoted
//! region that only the same character closes, and everything inside it
//! (whitespace included) is taken literally. The quote characters themselves
//! never reach the output.
//!
//! Known limitation: there is no backslash escaping and no substitution of any
//! kind. A quote left open at the end of the line is not an error; whatever was
//! collected so far still ends up in the last token.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    /// Between tokens, skipping whitespace.
    Start,
    /// Inside an unquoted part of a token.
    ReadingWord,
    /// Inside a quoted region opened by the contained character.
    ReadingQuote(char),
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

    fn make_tokens(&mut self) -> Vec<String> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingQuote(quote) => self.handle_quote(ch, quote),
            }
        }

        self.finish_token(&mut out);
        out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn handle_start(&mut self, ch: char) {
        match ch {
            c if c.is_whitespace() => {}
            '\'' | '"' => self.state = LexingState::ReadingQuote(ch),
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<String>) {
        match ch {
            c if c.is_whitespace() => {
                self.finish_token(out);
                self.state = LexingState::Start;
            }
            '\'' | '"' => self.state = LexingState::ReadingQuote(ch),
            c => self.buffer.push(c),
        }
    }

    fn handle_quote(&mut self, ch: char, quote: char) {
        if ch == quote {
            self.state = LexingState::ReadingWord;
        } else {
            self.buffer.push(ch);
        }
    }

    /// Empty tokens are dropped, so `''` on its own yields nothing.
    fn finish_token(&mut self, out: &mut Vec<String>) {
        if !self.buffer.is_empty() {
            out.push(std::mem::take(&mut self.buffer));
        }
    }
}

/// Split `line` into argument tokens.
///
/// An empty or whitespace-only line produces an empty vector.
pub fn tokenize(line: &str) -> Vec<String> {
    LexingFSM::new(line).make_tokens()
}
