//! Parser for build.kiln files.
//!
//! The syntax is line oriented:
//!
//! ```text
//! cc = gcc
//! file lib.o: lib.c lib.h
//!   command = $cc -c $in -o $out
//!   desc = compile lib
//! phony all: lib.o
//! default all
//! ```
//!
//! To avoid allocations parsing frequently uses references into the input
//! text, marked with the lifetime `'text`.

use crate::eval::{EvalPart, EvalString, LazyVars, Vars};
use crate::scanner::{ParseError, ParseResult, Scanner};

/// Which kind of job a declaration introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    File,
    Phony,
}

/// A `file` or `phony` declaration.
#[derive(Debug)]
pub struct Decl<Path> {
    pub kind: DeclKind,
    pub line: usize,
    pub targets: Vec<Path>,
    pub deps: Vec<Path>,
    pub vars: LazyVars,
}

#[derive(Debug)]
pub enum Statement<Path> {
    Decl(Decl<Path>),
    Default(Vec<Path>),
}

pub struct Parser<'text> {
    scanner: Scanner<'text>,
    pub vars: Vars,
    /// Paths are assembled into this buffer and then immediately passed to
    /// Loader::path() to canonicalize them.
    path_buf: String,
}

// 256-entry lookup table bitmap encoded as 4 64-bit integers.
type Bitmap = [u64; 4];

/// Returns a (index, mask) tuple for testing/setting the n-th bit in a bitmap.
#[inline(always)]
const fn bitmap_index_and_mask(c: u8) -> (usize, u64) {
    let index = c as usize >> 6;
    let mask = 1u64 << (c & 63);
    (index, mask)
}

/// Characters allowed in keywords, attribute and variable names.
const fn is_ident_char_baseline(c: u8) -> bool {
    matches!(c as char, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-')
}

/// Characters allowed unescaped in paths.  Any non-ASCII byte is part of a
/// UTF-8 sequence and is taken as-is.
const fn is_path_char_baseline(c: u8) -> bool {
    c >= 0x80
        || matches!(
          c as char,
          'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' | '/' | ',' | '+' | '@' | '%' | '~'
        )
}

/// Generates a character matching lookup table at compile time.
const fn ident_char_bitmap() -> Bitmap {
    let mut bitmap = [0u64; 4];
    let mut c = 0u8;
    loop {
        if is_ident_char_baseline(c) {
            let (index, mask) = bitmap_index_and_mask(c);
            bitmap[index] |= mask;
        }
        match c {
            u8::MAX => break,
            _ => c += 1,
        }
    }
    bitmap
}

const fn path_char_bitmap() -> Bitmap {
    let mut bitmap = [0u64; 4];
    let mut c = 0u8;
    loop {
        if is_path_char_baseline(c) {
            let (index, mask) = bitmap_index_and_mask(c);
            bitmap[index] |= mask;
        }
        match c {
            u8::MAX => break,
            _ => c += 1,
        }
    }
    bitmap
}

fn is_ident_char(c: u8) -> bool {
    const BITMAP: Bitmap = ident_char_bitmap();
    let (index, mask) = bitmap_index_and_mask(c);
    (BITMAP[index] & mask) != 0
}

fn is_path_char(c: u8) -> bool {
    const BITMAP: Bitmap = path_char_bitmap();
    let (index, mask) = bitmap_index_and_mask(c);
    (BITMAP[index] & mask) != 0
}

pub trait Loader {
    type Path;
    fn path(&mut self, path: &mut String) -> Self::Path;
}

impl<'text> Parser<'text> {
    /// The buffer must be nul-terminated.
    pub fn new(buf: &'text str) -> Parser<'text> {
        Parser {
            scanner: Scanner::new(buf),
            vars: Vars::new(),
            path_buf: String::with_capacity(64),
        }
    }

    pub fn format_parse_error(&self, filename: &std::path::Path, err: ParseError) -> String {
        self.scanner.format_parse_error(filename, err)
    }

    pub fn read<L: Loader>(&mut self, loader: &mut L) -> ParseResult<Option<Statement<L::Path>>> {
        loop {
            match self.scanner.peek() {
                '\0' if self.scanner.at_eof() => return Ok(None),
                '\0' => return self.scanner.parse_error("unexpected NUL"),
                '\n' | '\r' => self.scanner.expect_newline()?,
                '#' => self.skip_comment(),
                ' ' | '\t' => {
                    // Only blank or comment lines may be indented here.
                    self.scanner.skip_spaces();
                    match self.scanner.peek() {
                        '\0' | '\n' | '\r' | '#' => {}
                        _ => return self.scanner.parse_error("unexpected indent"),
                    }
                }
                _ => {
                    let ident = self.read_ident()?;
                    self.scanner.skip_spaces();
                    match ident {
                        "file" => {
                            return Ok(Some(Statement::Decl(
                                self.read_decl(loader, DeclKind::File)?,
                            )))
                        }
                        "phony" => {
                            return Ok(Some(Statement::Decl(
                                self.read_decl(loader, DeclKind::Phony)?,
                            )))
                        }
                        "default" => {
                            return Ok(Some(Statement::Default(self.read_default(loader)?)))
                        }
                        ident => {
                            let val = self.read_vardef()?.evaluate(&[&self.vars]);
                            self.vars.insert(ident, val);
                        }
                    }
                }
            }
        }
    }

    fn read_vardef(&mut self) -> ParseResult<EvalString<&'text str>> {
        self.scanner.skip_spaces();
        self.scanner.expect('=')?;
        self.scanner.skip_spaces();
        self.read_eval()
    }

    fn read_scoped_vars(&mut self) -> ParseResult<LazyVars> {
        let mut vars = LazyVars::new();
        while matches!(self.scanner.peek(), ' ' | '\t') {
            self.scanner.skip_spaces();
            match self.scanner.peek() {
                '#' => {
                    self.skip_comment();
                    continue;
                }
                '\n' | '\r' => {
                    self.scanner.expect_newline()?;
                    continue;
                }
                '\0' => break,
                _ => {}
            }
            let name = self.read_ident()?;
            self.scanner.skip_spaces();
            let val = self.read_vardef()?;
            if vars.insert(name.to_owned(), val.into_owned()).is_some() {
                return self
                    .scanner
                    .parse_error(format!("duplicate attribute {:?}", name));
            }
        }
        Ok(vars)
    }

    fn read_paths_to<L: Loader>(
        &mut self,
        loader: &mut L,
        v: &mut Vec<L::Path>,
    ) -> ParseResult<()> {
        self.scanner.skip_spaces();
        while let Some(path) = self.read_path(loader)? {
            v.push(path);
            self.scanner.skip_spaces();
        }
        Ok(())
    }

    fn read_decl<L: Loader>(&mut self, loader: &mut L, kind: DeclKind) -> ParseResult<Decl<L::Path>> {
        let line = self.scanner.line;
        let mut targets = Vec::new();
        self.read_paths_to(loader, &mut targets)?;
        if targets.is_empty() {
            return self.scanner.parse_error("expected target");
        }
        self.scanner.expect(':')?;

        let mut deps = Vec::new();
        self.read_paths_to(loader, &mut deps)?;

        self.skip_trailing_comment();
        self.scanner.expect_newline()?;
        let vars = self.read_scoped_vars()?;
        Ok(Decl {
            kind,
            line,
            targets,
            deps,
            vars,
        })
    }

    fn read_default<L: Loader>(&mut self, loader: &mut L) -> ParseResult<Vec<L::Path>> {
        let mut defaults = Vec::new();
        self.read_paths_to(loader, &mut defaults)?;
        if defaults.is_empty() {
            return self.scanner.parse_error("expected path");
        }
        self.skip_trailing_comment();
        self.scanner.expect_newline()?;
        Ok(defaults)
    }

    fn skip_comment(&mut self) {
        loop {
            match self.scanner.read() {
                '\0' | '\n' => return,
                _ => {}
            }
        }
    }

    /// Skips a comment at the end of a line, leaving the newline in place.
    fn skip_trailing_comment(&mut self) {
        if self.scanner.peek() != '#' {
            return;
        }
        while !matches!(self.scanner.peek(), '\0' | '\n') && !self.scanner.peek_newline() {
            self.scanner.next();
        }
    }

    fn read_ident(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while is_ident_char(self.scanner.peek() as u8) {
            self.scanner.next();
        }
        let end = self.scanner.ofs;
        if end == start {
            return self.scanner.parse_error("failed to scan ident");
        }
        Ok(self.scanner.slice(start, end))
    }

    /// Reads the rest of the line as an EvalString, consuming the newline.
    fn read_eval(&mut self) -> ParseResult<EvalString<&'text str>> {
        let mut parts = Vec::with_capacity(1);
        let mut ofs = self.scanner.ofs;
        let end = loop {
            match self.scanner.peek() {
                '\0' => break self.scanner.ofs,
                _ if self.scanner.peek_newline() => {
                    let end = self.scanner.ofs;
                    self.scanner.expect_newline()?;
                    break end;
                }
                '$' => {
                    let end = self.scanner.ofs;
                    self.scanner.next();
                    if end > ofs {
                        parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
                    }
                    if let Some(part) = self.read_escape()? {
                        parts.push(part);
                    }
                    ofs = self.scanner.ofs;
                }
                _ => self.scanner.next(),
            }
        };
        if end > ofs {
            parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
        }
        Ok(EvalString::new(parts))
    }

    fn read_path<L: Loader>(&mut self, loader: &mut L) -> ParseResult<Option<L::Path>> {
        self.path_buf.clear();
        loop {
            let start = self.scanner.ofs;
            while is_path_char(self.scanner.peek() as u8) {
                self.scanner.next();
            }
            self.path_buf
                .push_str(self.scanner.slice(start, self.scanner.ofs));
            match self.scanner.peek() {
                '$' => {
                    self.scanner.next();
                    match self.read_escape()? {
                        None => {}
                        Some(EvalPart::Literal(l)) => self.path_buf.push_str(l),
                        Some(EvalPart::VarRef(v)) => {
                            if let Some(v) = self.vars.get(v) {
                                self.path_buf.push_str(v);
                            }
                        }
                    }
                }
                ':' | ' ' | '\t' | '\n' | '\r' | '#' | '\0' => break,
                c => {
                    return self
                        .scanner
                        .parse_error(format!("unexpected character {:?}", c));
                }
            }
        }
        if self.path_buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(loader.path(&mut self.path_buf)))
    }

    /// Reads what follows a '$'.  Returns None for a line continuation.
    fn read_escape(&mut self) -> ParseResult<Option<EvalPart<&'text str>>> {
        Ok(Some(match self.scanner.peek() {
            '\n' | '\r' => {
                self.scanner.expect_newline()?;
                self.scanner.skip_spaces();
                return Ok(None);
            }
            ' ' | '$' | ':' | '#' => {
                let ofs = self.scanner.ofs;
                self.scanner.next();
                EvalPart::Literal(self.scanner.slice(ofs, ofs + 1))
            }
            '{' => {
                self.scanner.next();
                let start = self.scanner.ofs;
                loop {
                    match self.scanner.peek() {
                        '\0' => return self.scanner.parse_error("unexpected EOF"),
                        '}' => break,
                        _ => self.scanner.next(),
                    }
                }
                let end = self.scanner.ofs;
                self.scanner.next();
                EvalPart::VarRef(self.scanner.slice(start, end))
            }
            _ => {
                let ident = self.read_ident().or_else(|_| self.scanner.parse_error("bad $-escape"))?;
                EvalPart::VarRef(ident)
            }
        }))
    }
}
