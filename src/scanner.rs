//! Scans an input string (catalog or depfile) character by character.

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
    /// The buffer must end with a nul, which serves as the end marker.
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

    /// Slice between two offsets.  Offsets handed out by the scanner always
    /// sit next to ASCII delimiters, so they are char boundaries.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.buf[start..end]
    }

    pub fn peek(&self) -> char {
        self.buf.as_bytes()[self.ofs] as char
    }

    pub fn at_eof(&self) -> bool {
        self.ofs + 1 >= self.buf.len()
    }

    pub fn next(&mut self) {
        if self.peek() == '\n' {
            self.line += 1;
        }
        if self.ofs + 1 >= self.buf.len() {
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

    /// Read one char; at the terminating nul this keeps returning '\0'.
    pub fn read(&mut self) -> char {
        let c = self.peek();
        if c != '\0' || !self.at_eof() {
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

    /// Consume a line ending (either "\n" or "\r\n"), if present.
    pub fn skip_newline(&mut self) -> bool {
        if self.skip('\n') {
            return true;
        }
        if self.peek() == '\r' {
            self.next();
            if self.skip('\n') {
                return true;
            }
            self.back();
        }
        false
    }

    /// Read up to (not including) the end of the line, trimmed.
    pub fn read_to_eol(&mut self) -> &'a str {
        let start = self.ofs;
        while !matches!(self.peek(), '\n' | '\0') {
            self.next();
        }
        self.slice(start, self.ofs).trim()
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        let r = self.read();
        if r != ch {
            if r != '\0' {
                self.back();
            }
            return self.parse_error(format!("expected {:?}, got {:?}", ch, r));
        }
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
        for (line_number, line) in self.buf.split('\n').enumerate() {
            if ofs + line.len() >= err.ofs {
                let mut msg = "parse error: ".to_string();
                msg.push_str(&err.msg);
                msg.push('\n');

                let prefix = format!("{}:{}: ", filename.display(), line_number + 1);
                msg.push_str(&prefix);

                let context = line.trim_end_matches('\0');
                let col = (err.ofs - ofs).min(context.len());
                if context.len() > 60 {
                    msg.push_str(context.get(..60).unwrap_or(context));
                    msg.push_str("...");
                } else {
                    msg.push_str(context);
                }
                msg.push('\n');

                msg.push_str(&" ".repeat(prefix.len() + col.min(63)));
                msg.push_str("^\n");
                return msg;
            }
            ofs += line.len() + 1;
        }
        format!("parse error: {}\n{}", err.msg, filename.display())
    }
}

/// Copy text into a nul-terminated buffer suitable for a Scanner.
pub fn terminated(text: &str) -> String {
    let mut buf = String::with_capacity(text.len() + 1);
    buf.push_str(text);
    buf.push('\0');
    buf
}
