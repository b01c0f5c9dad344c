// Copyright 2024 The git-sift Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Path-pattern rules applied to tree entries.
//!
//! A rule block holds one rule per logical line. Pure `.gitignore`-style
//! patterns are aggregated into a single matcher with gitignore's own
//! precedence (later lines win, `!` negates). Patterns paired with a
//! script (`pattern => expr` or `pattern {% body %}`) are kept in input
//! order and matched first-rule-wins.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use itertools::Itertools as _;
use regex::{escape as regex_escape, Regex};
use thiserror::Error;

use crate::predicate::{EntryPredicate, PredicateCompileError, PredicateHost};

#[derive(Debug, Error)]
pub enum PatternParseError {
    #[error("Expecting the end %}} of multiline script (opened on line {start_line})")]
    UnterminatedScript { start_line: usize },
    #[error("Pattern on line {line} is empty")]
    EmptyPattern { line: usize },
    #[error("Pattern on line {line} cannot be negated when paired with a script")]
    NegatedScriptedPattern { line: usize },
    #[error("Cannot read pattern file {path}: {source}")]
    UnreadableFile {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Compile(#[from] PredicateCompileError),
}

// Trailing spaces are insignificant in gitignore syntax unless the last
// one is backslash-escaped.
fn trim_trailing_spaces(line: &str) -> &str {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let kept = line.trim_end_matches(' ');
    if kept.len() == line.len() {
        return line;
    }
    let backslashes = kept.chars().rev().take_while(|c| *c == '\\').count();
    if backslashes % 2 == 1 {
        // The first trimmed space was escaped; put it back.
        &line[..kept.len() + 1]
    } else {
        kept
    }
}

fn split_negation(line: &str) -> (bool, &str) {
    match line.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, line),
    }
}

fn push_literal(c: char, out: &mut String) {
    out.push_str(&regex_escape(&c.to_string()));
}

fn translate_segment(segment: &str, out: &mut String) {
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ (' ' | '#' | '!' | '?' | '*' | '\\')) => {
                    push_literal(escaped, out);
                }
                // Anything else keeps the backslash as a literal.
                Some(other) => {
                    push_literal('\\', out);
                    push_literal(other, out);
                }
                None => push_literal('\\', out),
            },
            '?' => out.push_str("[^/]"),
            '*' => out.push_str("[^/]*"),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    class.push(c);
                }
                // A class the segment never closes is dropped.
                if closed {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                }
            }
            other => push_literal(other, out),
        }
    }
}

/// A single gitignore glob compiled to a regex over full slash-separated
/// paths. A match covers the path itself and everything below it.
#[derive(Debug)]
struct PathGlob {
    regex: Regex,
}

impl PathGlob {
    /// Returns `None` when nothing remains of the glob (an empty line,
    /// or a bare `!` once negation has been split off).
    fn compile(glob: &str) -> Option<PathGlob> {
        if glob.is_empty() {
            return None;
        }
        let (only_directories, glob) = match glob.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, glob),
        };
        // A glob without a slash floats to any depth; one with a slash
        // is anchored at the tree root.
        let anchored = glob.starts_with('/') || glob.contains('/');
        let glob = glob.strip_prefix('/').unwrap_or(glob);

        let mut regex = String::from("^");
        if !anchored {
            regex.push_str("(.*/)?");
        }
        let segments = glob.split('/').collect_vec();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            match (*segment, i == last) {
                ("**", true) => regex.push_str(".*"),
                ("**", false) => regex.push_str("(.*/)?"),
                (segment, is_last) => {
                    translate_segment(segment, &mut regex);
                    if !is_last {
                        regex.push('/');
                    }
                }
            }
        }
        regex.push_str(if only_directories { "/.*" } else { "(/.*|$)" });
        Some(PathGlob {
            regex: Regex::new(&regex).unwrap(),
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// One line of the aggregated pure matcher.
#[derive(Debug)]
struct PureLine {
    negated: bool,
    glob: PathGlob,
}

/// A pattern paired with a compiled predicate.
pub struct ScriptedRule {
    /// The glob text as written, handed to the predicate as `pattern`.
    pub glob: String,
    matcher: PathGlob,
    pub predicate: Box<dyn EntryPredicate>,
    /// Position in the combined rule list; used for tie-breaks.
    pub index: usize,
}

impl std::fmt::Debug for ScriptedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRule")
            .field("glob", &self.glob)
            .field("index", &self.index)
            .finish()
    }
}

/// Result of matching one path against a pattern set.
#[derive(Debug)]
pub enum MatchedRule<'a> {
    /// A scripted rule matched; its predicate decides the entry's fate.
    Scripted(&'a ScriptedRule),
    /// The aggregated pure matcher reported the path as matched.
    Pure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachedMatch {
    Scripted(usize),
    Pure,
    NoMatch,
}

/// A parsed list of path-pattern rules with a concurrent match cache.
#[derive(Debug)]
pub struct PatternSet {
    scripted: Vec<ScriptedRule>,
    pure_lines: Vec<PureLine>,
    cache: RwLock<HashMap<String, CachedMatch>>,
}

impl PatternSet {
    pub fn empty() -> Self {
        PatternSet {
            scripted: vec![],
            pure_lines: vec![],
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Parses a rule block. Blank lines and `#` comment lines (leading
    /// whitespace tolerated) are ignored. Scripted rules compile through
    /// `host`.
    pub fn parse(input: &str, host: &dyn PredicateHost) -> Result<Self, PatternParseError> {
        let mut scripted = vec![];
        let mut pure_lines = vec![];
        let mut index = 0;
        let mut lines = input.lines().enumerate();
        while let Some((line_idx, line)) = lines.next() {
            let line_number = line_idx + 1;
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            if let Some((glob_part, body_start)) = line.split_once("{%") {
                let mut body = String::new();
                let mut terminated = false;
                if let Some((first, _rest)) = body_start.split_once("%}") {
                    body.push_str(first);
                    terminated = true;
                } else {
                    body.push_str(body_start);
                    body.push('\n');
                    for (_, body_line) in lines.by_ref() {
                        if let Some((first, _rest)) = body_line.split_once("%}") {
                            body.push_str(first);
                            terminated = true;
                            break;
                        }
                        body.push_str(body_line);
                        body.push('\n');
                    }
                }
                if !terminated {
                    return Err(PatternParseError::UnterminatedScript {
                        start_line: line_number,
                    });
                }
                scripted.push(Self::scripted_rule(
                    glob_part,
                    &body,
                    line_number,
                    index,
                    host,
                )?);
                index += 1;
            } else if let Some((glob_part, script)) = line.split_once("=>") {
                scripted.push(Self::scripted_rule(
                    glob_part,
                    script,
                    line_number,
                    index,
                    host,
                )?);
                index += 1;
            } else {
                let (negated, glob) = split_negation(trim_trailing_spaces(line));
                if let Some(glob) = PathGlob::compile(glob) {
                    pure_lines.push(PureLine { negated, glob });
                }
                index += 1;
            }
        }
        Ok(PatternSet {
            scripted,
            pure_lines,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn scripted_rule(
        glob_part: &str,
        script: &str,
        line_number: usize,
        index: usize,
        host: &dyn PredicateHost,
    ) -> Result<ScriptedRule, PatternParseError> {
        let glob = glob_part.trim();
        if glob.starts_with('!') {
            return Err(PatternParseError::NegatedScriptedPattern { line: line_number });
        }
        let matcher = PathGlob::compile(glob).ok_or(PatternParseError::EmptyPattern {
            line: line_number,
        })?;
        let predicate = host.compile_entry(script)?;
        Ok(ScriptedRule {
            glob: glob.to_string(),
            matcher,
            predicate,
            index,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.scripted.is_empty() && self.pure_lines.is_empty()
    }

    /// Matches `path` against the rule list: scripted rules first (in
    /// input order, first match wins), then the aggregated pure matcher.
    ///
    /// Results are memoised per path. The cache is first-writer-wins;
    /// concurrent readers never observe a partial result.
    pub fn match_path(&self, path: &str) -> Option<MatchedRule<'_>> {
        if let Some(cached) = self.cache.read().unwrap().get(path) {
            return self.cached_to_rule(*cached);
        }
        let computed = self.compute_match(path);
        let mut cache = self.cache.write().unwrap();
        let result = *cache.entry(path.to_string()).or_insert(computed);
        self.cached_to_rule(result)
    }

    fn compute_match(&self, path: &str) -> CachedMatch {
        for rule in &self.scripted {
            if rule.matcher.matches(path) {
                return CachedMatch::Scripted(rule.index);
            }
        }
        // Later lines take precedence, so check them in reverse.
        for line in self.pure_lines.iter().rev() {
            if line.glob.matches(path) {
                return if line.negated {
                    CachedMatch::NoMatch
                } else {
                    CachedMatch::Pure
                };
            }
        }
        CachedMatch::NoMatch
    }

    fn cached_to_rule(&self, cached: CachedMatch) -> Option<MatchedRule<'_>> {
        match cached {
            CachedMatch::Scripted(index) => {
                let rule = self
                    .scripted
                    .iter()
                    .find(|rule| rule.index == index)
                    .unwrap();
                Some(MatchedRule::Scripted(rule))
            }
            CachedMatch::Pure => Some(MatchedRule::Pure),
            CachedMatch::NoMatch => None,
        }
    }
}

/// Reads a rule file for `--keep-from-file`/`--remove-from-file`.
pub fn read_rules_file(path: &Path) -> Result<String, PatternParseError> {
    fs::read_to_string(path).map_err(|err| PatternParseError::UnreadableFile {
        path: path.display().to_string(),
        source: err,
    })
}
