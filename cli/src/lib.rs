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

#![deny(unused_must_use)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sift_lib::driver::{self, DriverError, RewriteParams};
use sift_lib::object_id::ObjectId as _;
use sift_lib::patterns;
use sift_lib::predicate::PredicateCompileError;

/// Rewrite git history onto a new branch through keep/remove filters.
///
/// Patterns use gitignore syntax, optionally paired with a script:
/// `<pattern> => <expression>` or `<pattern> {% <statements> %}`. A
/// commit filter runs once per commit and may edit its metadata or set
/// `commit.discard`.
#[derive(Parser, Debug)]
#[command(name = "git-sift", version)]
pub struct Args {
    /// Name of the branch that receives the rewritten history
    #[arg(long, short = 'b', value_name = "NAME")]
    branch: Option<String>,

    /// Overwrite the output branch if it already exists
    #[arg(long)]
    force: bool,

    /// Source repository (discovered from the current directory if
    /// omitted)
    #[arg(long = "repo-dir", short = 'd', value_name = "PATH")]
    repo_dir: Option<PathBuf>,

    /// Append a rule to the keep-pattern block (repeatable)
    #[arg(long = "keep", short = 'k', value_name = "RULE")]
    keep: Vec<String>,

    /// Append a file's contents to the keep-pattern block (repeatable)
    #[arg(long = "keep-from-file", value_name = "FILE")]
    keep_from_file: Vec<PathBuf>,

    /// Append a rule to the remove-pattern block (repeatable)
    #[arg(long = "remove", short = 'r', value_name = "RULE")]
    remove: Vec<String>,

    /// Append a file's contents to the remove-pattern block (repeatable)
    #[arg(long = "remove-from-file", value_name = "FILE")]
    remove_from_file: Vec<PathBuf>,

    /// Commit-predicate body
    #[arg(long = "commit-filter", short = 'c', value_name = "TEXT")]
    commit_filter: Option<String>,

    /// Commit-predicate body read from a file
    #[arg(
        long = "commit-filter-script",
        value_name = "FILE",
        conflicts_with = "commit_filter"
    )]
    commit_filter_script: Option<PathBuf>,

    /// Cut original-parent links at the boundary of the revision range
    #[arg(long)]
    detach: bool,

    /// Include submodule links in tree filtering
    #[arg(long = "include-links")]
    include_links: bool,

    /// Evaluate everything serially on the calling thread
    #[arg(long = "disable-threads")]
    disable_threads: bool,

    /// Do not prune two-parent commits via tree equality
    #[arg(long = "preserve-merge-commits")]
    preserve_merge_commits: bool,

    /// Print debug-level progress information
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Revision range to rewrite (defaults to HEAD)
    #[arg(value_name = "REVSPEC")]
    revspec: Option<String>,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "sift_lib=debug,sift_cli=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn assemble_rule_block(rules: &[String], files: &[PathBuf]) -> Result<String, DriverError> {
    let mut block = String::new();
    for rule in rules {
        block.push_str(rule);
        block.push('\n');
    }
    for file in files {
        block.push_str(&patterns::read_rules_file(file)?);
        block.push('\n');
    }
    Ok(block)
}

fn rewrite_params(args: &Args) -> Result<RewriteParams, DriverError> {
    let commit_filter = match (&args.commit_filter, &args.commit_filter_script) {
        (_, Some(path)) => Some(std::fs::read_to_string(path).map_err(|err| {
            DriverError::PredicateCompilation(PredicateCompileError {
                diagnostics: format!("Cannot read script file {}: {err}", path.display()),
            })
        })?),
        (Some(text), None) => Some(text.clone()),
        (None, None) => None,
    };
    Ok(RewriteParams {
        repo_path: args.repo_dir.clone(),
        branch: args.branch.clone().unwrap_or_default(),
        force: args.force,
        keep_rules: assemble_rule_block(&args.keep, &args.keep_from_file)?,
        remove_rules: assemble_rule_block(&args.remove, &args.remove_from_file)?,
        commit_filter,
        revspec: args.revspec.clone(),
        detach: args.detach,
        include_links: args.include_links,
        disable_threads: args.disable_threads,
        preserve_merge_commits: args.preserve_merge_commits,
    })
}

fn print_error(err: &DriverError) {
    match err {
        // Compile diagnostics span multiple lines; keep the summary line
        // separate from the details block.
        DriverError::PredicateCompilation(compile_err) => {
            eprintln!("Error: failed to compile predicate");
            eprintln!("{compile_err}");
        }
        other => eprintln!("Error: {other}"),
    }
}

pub fn run() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let exit_ok = matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = err.print();
            return if exit_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            };
        }
    };
    init_tracing(args.verbose);
    let result = rewrite_params(&args).and_then(|params| {
        let head = driver::run(&params)?;
        Ok((params.branch.clone(), head))
    });
    match result {
        Ok((branch, Some(head))) => {
            println!("Branch {branch} now points to {}", head.hex());
            ExitCode::SUCCESS
        }
        Ok((branch, None)) => {
            println!("Every commit was discarded; branch {branch} was not written");
            ExitCode::SUCCESS
        }
        Err(err) => {
            print_error(&err);
            ExitCode::from(1)
        }
    }
}
