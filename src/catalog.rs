//! Rule catalog files: the declarations a build is made of.
//!
//! ```text
//! # comment
//! file src/a.c src/a.h
//! depend obj/a.d: src/a.c
//!   command = cc -MM %src -MT obj/a.o > %dst
//! compile obj/a.o: obj/a.d
//!   command = cc -c src/a.c -o %dst
//! default obj/a.o
//! ```
//!
//! Every source must be declared before it is used, so a catalog can only
//! describe an acyclic graph.

use crate::error::Error;
use crate::graph::Registry;
use crate::scanner::{self, ParseResult, Scanner};
use crate::step::{CommandKind, CommandStep, Step};
use crate::template::Template;
use anyhow::{anyhow, bail};
use std::path::{Path, PathBuf};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Kind {
    Phony,
    Command(CommandKind),
    Touch,
    Concat,
    CompareCopy,
}

impl Kind {
    fn from_keyword(word: &str) -> Option<Kind> {
        Some(match word {
            "phony" => Kind::Phony,
            "exec" => Kind::Command(CommandKind::Exec),
            "depend" => Kind::Command(CommandKind::Depend),
            "compile" => Kind::Command(CommandKind::Compile),
            "archive" => Kind::Command(CommandKind::Archive),
            "link" => Kind::Command(CommandKind::Link),
            "touch" => Kind::Touch,
            "concat" => Kind::Concat,
            "cmpcp" => Kind::CompareCopy,
            _ => return None,
        })
    }
}

#[derive(Debug)]
struct Rule<'text> {
    kind: Kind,
    line: usize,
    target: &'text str,
    sources: Vec<&'text str>,
    vars: Vec<(&'text str, &'text str)>,
}

#[derive(Debug)]
enum Statement<'text> {
    Files { line: usize, files: Vec<&'text str> },
    Rule(Rule<'text>),
    Default(Vec<&'text str>),
    Bootstrap(&'text str),
}

struct Parser<'text> {
    scanner: Scanner<'text>,
}

impl<'text> Parser<'text> {
    fn new(buf: &'text str) -> Self {
        Parser {
            scanner: Scanner::new(buf),
        }
    }

    fn skip_line(&mut self) {
        self.scanner.read_to_eol();
        self.scanner.skip_newline();
    }

    fn expect_eol(&mut self) -> ParseResult<()> {
        self.scanner.skip_spaces();
        if self.scanner.peek() == '#' {
            self.scanner.read_to_eol();
        }
        if self.scanner.at_eof() || self.scanner.skip_newline() {
            return Ok(());
        }
        self.scanner.parse_error("expected newline")
    }

    fn read_ident(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while matches!(self.scanner.peek(), 'a'..='z' | 'A'..='Z' | '0'..='9' | '_') {
            self.scanner.next();
        }
        if self.scanner.ofs == start {
            return self.scanner.parse_error("expected identifier");
        }
        Ok(self.scanner.slice(start, self.scanner.ofs))
    }

    /// Read a path, or None at the end of the line (or a trailing comment).
    fn read_path(&mut self) -> Option<&'text str> {
        self.scanner.skip_spaces();
        if self.scanner.peek() == '#' {
            return None;
        }
        let start = self.scanner.ofs;
        while !matches!(
            self.scanner.peek(),
            '\0' | ' ' | '\t' | ':' | '\n' | '\r'
        ) {
            self.scanner.next();
        }
        if self.scanner.ofs == start {
            return None;
        }
        Some(self.scanner.slice(start, self.scanner.ofs))
    }

    fn read_paths(&mut self) -> Vec<&'text str> {
        let mut paths = Vec::new();
        while let Some(p) = self.read_path() {
            paths.push(p);
        }
        paths
    }

    /// Indented `key = value` lines following a rule.
    fn read_vars(&mut self) -> ParseResult<Vec<(&'text str, &'text str)>> {
        let mut vars = Vec::new();
        while matches!(self.scanner.peek(), ' ' | '\t') {
            self.scanner.skip_spaces();
            match self.scanner.peek() {
                '#' => {
                    self.skip_line();
                    continue;
                }
                '\n' | '\r' | '\0' => {
                    self.expect_eol()?;
                    continue;
                }
                _ => {}
            }
            let key = self.read_ident()?;
            self.scanner.skip_spaces();
            self.scanner.expect('=')?;
            self.scanner.skip_spaces();
            let value = self.scanner.read_to_eol();
            self.scanner.skip_newline();
            vars.push((key, value));
        }
        Ok(vars)
    }

    fn read_rule(&mut self, kind: Kind) -> ParseResult<Rule<'text>> {
        let line = self.scanner.line;
        let target = match self.read_path() {
            Some(t) => t,
            None => return self.scanner.parse_error("expected target"),
        };
        self.scanner.skip_spaces();
        self.scanner.expect(':')?;
        let sources = self.read_paths();
        self.expect_eol()?;
        let vars = self.read_vars()?;
        Ok(Rule {
            kind,
            line,
            target,
            sources,
            vars,
        })
    }

    fn read(&mut self) -> ParseResult<Option<Statement<'text>>> {
        loop {
            match self.scanner.peek() {
                '\0' if self.scanner.at_eof() => return Ok(None),
                '\n' | '\r' => self.expect_eol()?,
                '#' => self.skip_line(),
                ' ' | '\t' => {
                    self.scanner.skip_spaces();
                    if !matches!(self.scanner.peek(), '#' | '\n' | '\r' | '\0') {
                        return self.scanner.parse_error("unexpected indent");
                    }
                    self.expect_eol()?;
                }
                _ => {
                    let start = self.scanner.ofs;
                    let line = self.scanner.line;
                    let ident = self.read_ident()?;
                    let stmt = match ident {
                        "file" => {
                            let files = self.read_paths();
                            self.expect_eol()?;
                            Statement::Files { line, files }
                        }
                        "default" => {
                            let targets = self.read_paths();
                            self.expect_eol()?;
                            Statement::Default(targets)
                        }
                        "bootstrap" => {
                            let target = match self.read_path() {
                                Some(t) => t,
                                None => return self.scanner.parse_error("expected target"),
                            };
                            self.expect_eol()?;
                            Statement::Bootstrap(target)
                        }
                        word => match Kind::from_keyword(word) {
                            Some(kind) => Statement::Rule(self.read_rule(kind)?),
                            None => {
                                self.scanner.ofs = start;
                                return self
                                    .scanner
                                    .parse_error(format!("unknown statement '{}'", word));
                            }
                        },
                    };
                    return Ok(Some(stmt));
                }
            }
        }
    }
}

/// A loaded catalog: the populated registry plus the catalog's own
/// requests.
pub struct Catalog {
    pub registry: Registry,
    /// Targets built when none are named on the command line.
    pub defaults: Vec<String>,
    /// Target that rebuilds the build driver itself, if any.
    pub bootstrap: Option<String>,
}

fn make_step(rule: &Rule) -> Result<Step, Error> {
    let var = |name: &str| rule.vars.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
    let allowed: &[&str] = match rule.kind {
        Kind::Command(CommandKind::Compile) => &["command", "sep", "cwd", "depfile"],
        Kind::Command(_) => &["command", "sep", "cwd"],
        _ => &[],
    };
    for (key, _) in &rule.vars {
        if !allowed.contains(key) {
            return Err(Error::config(format!("unexpected setting '{}'", key)));
        }
    }

    let kind = match rule.kind {
        Kind::Phony => return Ok(Step::Phony),
        Kind::Touch => return Ok(Step::Touch),
        Kind::Concat => return Ok(Step::Concat),
        Kind::CompareCopy => return Ok(Step::CompareCopy),
        Kind::Command(kind) => kind,
    };
    let sep = match var("sep") {
        None => ' ',
        Some(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(Error::config(format!(
                        "sep must be a single character, got {:?}",
                        s
                    )))
                }
            }
        }
    };
    let command = var("command").ok_or_else(|| Error::config("missing 'command'"))?;
    Ok(Step::Command(CommandStep {
        kind,
        template: Template::parse(command, sep)?,
        depfile: var("depfile").map(str::to_owned),
        cwd: var("cwd").map(PathBuf::from),
    }))
}

/// Build a catalog from already-read text.  `top` is the directory every
/// target is relative to; `filename` is only used in messages.
pub fn parse(top: &Path, filename: &Path, text: &str) -> anyhow::Result<Catalog> {
    let buf = scanner::terminated(text);
    let mut parser = Parser::new(&buf);
    let mut catalog = Catalog {
        registry: Registry::new(top),
        defaults: Vec::new(),
        bootstrap: None,
    };

    loop {
        let stmt = match parser.read() {
            Ok(None) => break,
            Ok(Some(s)) => s,
            Err(err) => bail!(parser.scanner.format_parse_error(filename, err)),
        };
        match stmt {
            Statement::Files { line, files } => {
                for file in files {
                    catalog
                        .registry
                        .source(file)
                        .map_err(|err| anyhow!("{}:{}: {}", filename.display(), line, err))?;
                }
            }
            Statement::Rule(rule) => {
                let at = |err: Error| {
                    anyhow!("{}:{}: {}: {}", filename.display(), rule.line, rule.target, err)
                };
                let mut sources = Vec::with_capacity(rule.sources.len());
                for src in &rule.sources {
                    let node = catalog.registry.get(src).ok_or_else(|| {
                        at(Error::config(format!(
                            "source '{}' is not declared (declare it earlier with 'file' or a rule)",
                            src
                        )))
                    })?;
                    sources.push(node);
                }
                let step = make_step(&rule).map_err(at)?;
                catalog
                    .registry
                    .register(rule.target, sources, step)
                    .map_err(at)?;
            }
            Statement::Default(targets) => {
                catalog
                    .defaults
                    .extend(targets.into_iter().map(str::to_owned));
            }
            Statement::Bootstrap(target) => {
                if catalog.bootstrap.is_some() {
                    bail!("{}: more than one bootstrap target", filename.display());
                }
                catalog.bootstrap = Some(target.to_owned());
            }
        }
    }

    for target in catalog.defaults.iter().chain(catalog.bootstrap.iter()) {
        if catalog.registry.get(target).is_none() {
            bail!("{}: unknown target '{}'", filename.display(), target);
        }
    }
    Ok(catalog)
}

/// Load the catalog at `path`.  Targets are relative to its directory.
pub fn load(path: &Path) -> anyhow::Result<Catalog> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| anyhow!("read {}: {}", path.display(), err))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let top = std::fs::canonicalize(dir)
        .map_err(|err| anyhow!("{}: {}", dir.display(), err))?;
    parse(&top, path, &text)
}
