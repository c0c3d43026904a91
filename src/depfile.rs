//! Parsing of make-style dependency files ("foo.o: foo.cpp foo.hpp \").

use crate::scanner::{ParseResult, Scanner};

#[derive(Debug)]
pub struct Deps<'a> {
    /// The target named by the first rule.
    pub target: &'a str,
    /// Prerequisites of every rule, in file order.
    pub deps: Vec<&'a str>,
}

/// Skip spaces and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.read() {
            ' ' | '\t' => {}
            '\\' => {
                if !scanner.skip_newline() {
                    return scanner.parse_error("invalid backslash escape");
                }
            }
            '\0' => break,
            _ => {
                scanner.back();
                break;
            }
        }
    }
    Ok(())
}

fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<&'a str>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    while !matches!(scanner.peek(), '\0' | ' ' | '\t' | ':' | '\n' | '\r' | '\\') {
        scanner.next();
    }
    let end = scanner.ofs;
    if end == start {
        return Ok(None);
    }
    Ok(Some(scanner.slice(start, end)))
}

fn skip_blank_lines(scanner: &mut Scanner) {
    loop {
        scanner.skip_spaces();
        if !scanner.skip_newline() {
            break;
        }
    }
}

pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Deps<'a>> {
    skip_blank_lines(scanner);
    let target = match read_path(scanner)? {
        None => return scanner.parse_error("expected file"),
        Some(o) => o,
    };
    scanner.expect(':')?;
    let mut deps = Vec::new();
    loop {
        while let Some(p) = read_path(scanner)? {
            deps.push(p);
        }
        if scanner.peek() != '\0' && !scanner.skip_newline() {
            return scanner.parse_error("expected newline");
        }
        skip_blank_lines(scanner);
        if scanner.at_eof() {
            break;
        }
        // Further rules, e.g. the empty "foo.hpp:" rules from gcc -MP.
        if read_path(scanner)?.is_none() {
            return scanner.parse_error("expected file");
        }
        scanner.expect(':')?;
    }

    Ok(Deps { target, deps })
}
