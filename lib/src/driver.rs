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

//! Parameter validation and the top-level run: enumerate the range,
//! rewrite every commit, point the output branch at the result.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::instrument;

use crate::object_id::ObjectId as _;
use crate::patterns::{PatternParseError, PatternSet};
use crate::predicate::{PredicateCompileError, PredicateHost};
use crate::revspec;
use crate::rewrite::{CommitRewriter, RewriteError, RewriteOptions};
use crate::scheduler::{ExecutionMode, Scheduler};
use crate::script::ScriptHost;
use crate::store::{CommitId, Store, StoreError};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Not a git repository: {path}")]
    InvalidRepository { path: String },
    #[error("A branch name is required")]
    MissingBranchName,
    #[error("Branch {branch} already exists (use --force to overwrite)")]
    BranchExistsNoForce { branch: String },
    #[error("Invalid revspec: {detail}")]
    InvalidRevspec { detail: String },
    #[error("No commit filter or tree filter is configured")]
    MissingFilter,
    #[error("Failed to compile predicate:\n{0}")]
    PredicateCompilation(PredicateCompileError),
    #[error(transparent)]
    PatternParse(PatternParseError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PatternParseError> for DriverError {
    fn from(err: PatternParseError) -> Self {
        match err {
            PatternParseError::Compile(err) => DriverError::PredicateCompilation(err),
            other => DriverError::PatternParse(other),
        }
    }
}

/// Everything one run needs. `keep_rules`/`remove_rules` are rule blocks
/// in the syntax of [`crate::patterns`]; the CLI assembles them from
/// repeated flags and rule files.
#[derive(Debug, Default)]
pub struct RewriteParams {
    /// Source repository; discovered from the working directory if unset.
    pub repo_path: Option<PathBuf>,
    pub branch: String,
    pub force: bool,
    pub keep_rules: String,
    pub remove_rules: String,
    pub commit_filter: Option<String>,
    pub revspec: Option<String>,
    pub detach: bool,
    pub include_links: bool,
    pub disable_threads: bool,
    pub preserve_merge_commits: bool,
}

/// Runs a rewrite with the built-in script host.
pub fn run(params: &RewriteParams) -> Result<Option<CommitId>, DriverError> {
    run_with_host(params, &ScriptHost::new())
}

/// Runs a rewrite. Returns the id the output branch was pointed at, or
/// `None` when every commit in the range was discarded (the branch is
/// not written in that case).
#[instrument(skip_all, fields(branch = %params.branch))]
pub fn run_with_host(
    params: &RewriteParams,
    host: &dyn PredicateHost,
) -> Result<Option<CommitId>, DriverError> {
    if params.branch.is_empty() {
        return Err(DriverError::MissingBranchName);
    }
    let has_tree_filter =
        !params.keep_rules.trim().is_empty() || !params.remove_rules.trim().is_empty();
    if params.commit_filter.is_none() && !has_tree_filter {
        return Err(DriverError::MissingFilter);
    }

    let store = match &params.repo_path {
        Some(path) => Store::open(path).map_err(|_| DriverError::InvalidRepository {
            path: path.display().to_string(),
        })?,
        None => {
            Store::discover(Path::new(".")).map_err(|_| DriverError::InvalidRepository {
                path: ".".to_string(),
            })?
        }
    };

    if store.branch_exists(&params.branch) && !params.force {
        return Err(DriverError::BranchExistsNoForce {
            branch: params.branch.clone(),
        });
    }

    let keep = PatternSet::parse(&params.keep_rules, host)?;
    let remove = PatternSet::parse(&params.remove_rules, host)?;
    let commit_predicate = params
        .commit_filter
        .as_deref()
        .map(|text| host.compile_commit(text))
        .transpose()
        .map_err(DriverError::PredicateCompilation)?;

    let range = revspec::parse(&store, params.revspec.as_deref())
        .map_err(|err| DriverError::InvalidRevspec { detail: err.detail })?;
    let commits = revspec::enumerate(&store, &range)?;
    tracing::debug!(count = commits.len(), "enumerated commits to rewrite");

    let mode = if params.disable_threads {
        ExecutionMode::Serial
    } else {
        ExecutionMode::Parallel
    };
    let options = RewriteOptions {
        detach: params.detach,
        include_links: params.include_links,
        preserve_merge_commits: params.preserve_merge_commits,
    };
    let mut rewriter = CommitRewriter::new(
        &store,
        Scheduler::new(mode),
        keep,
        remove,
        commit_predicate,
        options,
    );
    let head = rewriter.rewrite_all(commits)?;

    match &head {
        Some(head) => {
            store.set_branch(&params.branch, head, params.force)?;
            tracing::debug!(tip = %head.hex(), "output branch written");
        }
        None => {
            tracing::debug!("every commit was discarded; branch not written");
        }
    }
    Ok(head)
}
