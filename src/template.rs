//! Command templates: command lines with `%dst`, `%src`, `%srcN` and `%top`
//! placeholders, expanded against a node just before its step runs.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Dst,
    /// All sources, joined by the template's separator.
    Src,
    /// The N-th source.
    SrcN(usize),
    Top,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    text: String,
    parts: Vec<Part>,
    sep: char,
}

fn push_literal(parts: &mut Vec<Part>, s: &str) {
    if s.is_empty() {
        return;
    }
    if let Some(Part::Literal(last)) = parts.last_mut() {
        last.push_str(s);
    } else {
        parts.push(Part::Literal(s.to_owned()));
    }
}

impl Template {
    /// Parse a template, rejecting unknown `%` patterns.
    pub fn parse(text: &str, sep: char) -> Result<Template> {
        let mut parts = Vec::new();
        let mut rest = text;
        while let Some(i) = rest.find('%') {
            push_literal(&mut parts, &rest[..i]);
            let tail = &rest[i + 1..];
            if let Some(t) = tail.strip_prefix('%') {
                push_literal(&mut parts, "%");
                rest = t;
            } else if let Some(t) = tail.strip_prefix("dst") {
                parts.push(Part::Dst);
                rest = t;
            } else if let Some(t) = tail.strip_prefix("top") {
                parts.push(Part::Top);
                rest = t;
            } else if let Some(t) = tail.strip_prefix("src") {
                let digits = t.len() - t.trim_start_matches(|c: char| c.is_ascii_digit()).len();
                if digits == 0 {
                    parts.push(Part::Src);
                } else {
                    let n = t[..digits]
                        .parse()
                        .map_err(|_| Error::config(format!("bad source index in {:?}", text)))?;
                    parts.push(Part::SrcN(n));
                }
                rest = &t[digits..];
            } else {
                return Err(Error::config(format!(
                    "command has unknown pattern %{}: {:?}",
                    tail.chars().take(8).collect::<String>(),
                    text
                )));
            }
        }
        push_literal(&mut parts, rest);
        Ok(Template {
            text: text.to_owned(),
            parts,
            sep,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Ensure every `%srcN` refers to one of `count` sources.
    pub fn check_arity(&self, count: usize) -> Result<()> {
        for part in &self.parts {
            if let Part::SrcN(n) = part {
                if *n >= count {
                    return Err(Error::config(format!(
                        "command refers to %src{} but has {} sources: {:?}",
                        n, count, self.text
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn render(&self, dst: &str, srcs: &[&str], top: &str) -> String {
        let mut out = String::with_capacity(self.text.len());
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Dst => out.push_str(dst),
                Part::Top => out.push_str(top),
                Part::SrcN(n) => out.push_str(srcs.get(*n).copied().unwrap_or("")),
                Part::Src => {
                    for (i, src) in srcs.iter().enumerate() {
                        if i > 0 {
                            out.push(self.sep);
                        }
                        out.push_str(src);
                    }
                }
            }
        }
        out
    }
}
