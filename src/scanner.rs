//! Scans an input string (build file) character by character.

use std::path::Path;

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

pub struct Scanner<'a> {
    buf: &'a str,
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a str) -> Self {
        if !buf.ends_with('\0') {
            panic!("Scanner requires nul-terminated buf");
        }
        Scanner {
            buf,
            ofs: 0,
            line: 1,
        }
    }

    /// Slices the input.  Callers only cut at ASCII delimiters, which are
    /// always char boundaries.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.buf[start..end]
    }
    /// The byte at the cursor.  Non-ASCII bytes come back as chars >= 0x80,
    /// which no caller treats as syntax.
    pub fn peek(&self) -> char {
        self.buf.as_bytes()[self.ofs] as char
    }
    /// Whether the cursor is on the terminating nul, as opposed to a nul
    /// byte inside the input.
    pub fn at_eof(&self) -> bool {
        self.ofs == self.buf.len() - 1
    }
    pub fn peek_newline(&self) -> bool {
        if self.peek() == '\n' {
            return true;
        }
        if self.ofs >= self.buf.len() - 1 {
            return false;
        }
        let peek2 = self.buf.as_bytes()[self.ofs + 1] as char;
        self.peek() == '\r' && peek2 == '\n'
    }
    pub fn next(&mut self) {
        if self.peek() == '\n' {
            self.line += 1;
        }
        if self.ofs == self.buf.len() - 1 {
            panic!("scanned past end")
        }
        self.ofs += 1;
    }
    pub fn back(&mut self) {
        if self.ofs == 0 {
            panic!("back at start")
        }
        self.ofs -= 1;
        if self.peek() == '\n' {
            self.line -= 1;
        }
    }
    pub fn read(&mut self) -> char {
        let c = self.peek();
        if c != '\0' {
            self.next();
        }
        c
    }
    pub fn skip(&mut self, ch: char) -> bool {
        if self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    pub fn skip_spaces(&mut self) {
        while self.skip(' ') || self.skip('\t') {}
    }

    /// Consumes a line ending, accepting both "\n" and "\r\n".
    pub fn expect_newline(&mut self) -> ParseResult<()> {
        if self.peek_newline() {
            if self.peek() == '\r' {
                self.next();
            }
            self.next();
            return Ok(());
        }
        if self.peek() == '\0' {
            return Ok(());
        }
        self.parse_error(format!("expected newline, got {:?}", self.peek()))
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        let r = self.peek();
        if r != ch {
            return self.parse_error(format!("expected {:?}, got {:?}", ch, r));
        }
        self.next();
        Ok(())
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        let mut ofs = 0;
        let lines = self.buf.split('\n');
        for (line_number, line) in lines.enumerate() {
            if ofs + line.len() >= err.ofs {
                let mut msg = "parse error: ".to_string();
                msg.push_str(&err.msg);
                msg.push('\n');

                let prefix = format!("{}:{}: ", filename.display(), line_number + 1);
                msg.push_str(&prefix);

                let line = line.trim_end_matches('\0');
                let col = (err.ofs - ofs).min(line.len());
                // Trim long lines to fit on screen, on char boundaries.
                let mut start = col.saturating_sub(20);
                while !line.is_char_boundary(start) {
                    start -= 1;
                }
                let mut end = (start + 40).min(line.len());
                while !line.is_char_boundary(end) {
                    end -= 1;
                }
                let mut caret = prefix.len() + col - start;
                if start > 0 {
                    msg.push_str("...");
                    caret += 3;
                }
                msg.push_str(&line[start..end]);
                if end < line.len() {
                    msg.push_str("...");
                }
                msg.push('\n');

                msg.push_str(&" ".repeat(caret));
                msg.push_str("^\n");
                return msg;
            }
            ofs += line.len() + 1;
        }
        panic!("invalid offset when formatting error")
    }
}
