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

//! The commit-rewrite state machine.
//!
//! Commits are processed strictly in topological-reverse order (parents
//! before children), so the commit map is always current when a child
//! re-maps its parents. Parents of discarded commits resolve to the
//! nearest rewritten ancestor; parents outside the processed range keep
//! their original ids.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use thiserror::Error;
use tracing::instrument;

use crate::object_id::ObjectId as _;
use crate::patterns::PatternSet;
use crate::predicate::{CommitPredicate, MutableCommit};
use crate::scheduler::Scheduler;
use crate::store::{Commit, CommitId, Store, StoreError, TreeId};
use crate::tree_filter::{rebuild_tree, TreeFilterError, TreeFilterOutcome};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Predicate failed on commit {}: {}", .source_commit_id.hex(), .message)]
    PredicateRuntime {
        source_commit_id: CommitId,
        message: String,
    },
    #[error("Cannot remap parent {} of commit {}", .parent.hex(), .commit.hex())]
    ParentRemapFailure { commit: CommitId, parent: CommitId },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteOptions {
    /// Cut original-parent links at the boundary of the processed range.
    pub detach: bool,
    /// Let submodule links take part in tree filtering.
    pub include_links: bool,
    /// Never prune a two-parent commit by tree equality.
    pub preserve_merge_commits: bool,
}

pub struct CommitRewriter<'a> {
    store: &'a Store,
    scheduler: Scheduler,
    keep: PatternSet,
    remove: PatternSet,
    commit_predicate: Option<Box<dyn CommitPredicate>>,
    options: RewriteOptions,
    in_range: HashSet<CommitId>,
    commit_map: HashMap<CommitId, CommitId>,
    discarded: HashSet<CommitId>,
    // Resolution of each discarded commit, computed when it is discarded
    // (its parents have been processed by then), so lookups never recurse.
    resolve_memo: HashMap<CommitId, Option<CommitId>>,
    tree_cache: HashMap<CommitId, TreeId>,
    head: Option<CommitId>,
}

impl<'a> CommitRewriter<'a> {
    pub fn new(
        store: &'a Store,
        scheduler: Scheduler,
        keep: PatternSet,
        remove: PatternSet,
        commit_predicate: Option<Box<dyn CommitPredicate>>,
        options: RewriteOptions,
    ) -> Self {
        CommitRewriter {
            store,
            scheduler,
            keep,
            remove,
            commit_predicate,
            options,
            in_range: HashSet::new(),
            commit_map: HashMap::new(),
            discarded: HashSet::new(),
            resolve_memo: HashMap::new(),
            tree_cache: HashMap::new(),
            head: None,
        }
    }

    /// Rewrites `commits` (in topological-reverse order) and returns the
    /// id that the output branch should point at, if any commit survived.
    pub fn rewrite_all(
        &mut self,
        commits: Vec<CommitId>,
    ) -> Result<Option<CommitId>, RewriteError> {
        self.in_range = commits.iter().cloned().collect();
        for id in commits {
            self.process_commit(id)?;
        }
        Ok(self.head.clone())
    }

    pub fn commit_map(&self) -> &HashMap<CommitId, CommitId> {
        &self.commit_map
    }

    pub fn discarded(&self) -> &HashSet<CommitId> {
        &self.discarded
    }

    #[instrument(skip_all, fields(commit = %id.hex()))]
    fn process_commit(&mut self, id: CommitId) -> Result<(), RewriteError> {
        let source = self.store.read_commit(&id)?;
        let mut mutable = MutableCommit::new(id.clone(), &source);

        if let Some(predicate) = &self.commit_predicate {
            predicate
                .invoke(self.store, &mut mutable)
                .map_err(|err| RewriteError::PredicateRuntime {
                    source_commit_id: id.clone(),
                    message: err.message,
                })?;
            if mutable.discard {
                tracing::debug!("commit filter discarded the commit");
                return self.discard_commit(id, &source.parents);
            }
        }

        let filtering = !self.keep.is_empty() || !self.remove.is_empty();
        let new_tree = if filtering {
            let commit_cell = Mutex::new(mutable);
            let outcome = rebuild_tree(
                self.store,
                &self.scheduler,
                &self.keep,
                &self.remove,
                &commit_cell,
                &source.tree,
                self.options.include_links,
            )
            .map_err(|err| match err {
                TreeFilterError::Store(err) => RewriteError::Store(err),
                TreeFilterError::Predicate(err) => RewriteError::PredicateRuntime {
                    source_commit_id: id.clone(),
                    message: err.message,
                },
            })?;
            mutable = commit_cell.into_inner().unwrap();
            match outcome {
                TreeFilterOutcome::Rebuilt(tree_id) => {
                    if mutable.discard {
                        return self.discard_commit(id, &source.parents);
                    }
                    tree_id
                }
                TreeFilterOutcome::EmptyWorkingSet => {
                    tracing::debug!("tree filter emptied the tree");
                    return self.discard_commit(id, &source.parents);
                }
                TreeFilterOutcome::CommitDiscarded => {
                    tracing::debug!("tree predicate discarded the commit");
                    return self.discard_commit(id, &source.parents);
                }
            }
        } else {
            source.tree.clone()
        };

        let mut new_parents: Vec<(CommitId, bool)> = vec![];
        let mut prune_candidate = None;
        for parent in &source.parents {
            let Some(resolved) = self.resolve_parent(&id, parent)? else {
                continue;
            };
            let unchanged = resolved == *parent && !self.in_range.contains(parent);
            if prune_candidate.is_none() && self.tree_of(&resolved)? == new_tree {
                prune_candidate = Some(resolved.clone());
            }
            new_parents.push((resolved, unchanged));
        }

        if let Some(candidate) = prune_candidate {
            if !(self.options.preserve_merge_commits && new_parents.len() == 2) {
                tracing::debug!(parent = %candidate.hex(), "pruned: tree equals resolved parent");
                self.discard_commit(id, &source.parents)?;
                self.head = Some(candidate);
                return Ok(());
            }
        }

        if self.options.detach {
            new_parents.retain(|(_, unchanged)| !*unchanged);
        }

        let new_commit = Commit {
            parents: new_parents.into_iter().map(|(id, _)| id).collect(),
            tree: new_tree.clone(),
            message: mutable.message.clone(),
            author: mutable.author.clone(),
            committer: mutable.committer.clone(),
        };
        let new_id = self.store.write_commit(&new_commit)?;
        tracing::debug!(rewritten = %new_id.hex(), "materialised commit");
        self.tree_cache.insert(new_id.clone(), new_tree);
        self.commit_map.insert(id, new_id.clone());
        self.head = Some(new_id);
        Ok(())
    }

    /// Marks `id` discarded and records where its descendants should
    /// re-map to: the first source parent (in order) with a non-empty
    /// resolution.
    fn discard_commit(
        &mut self,
        id: CommitId,
        parents: &[CommitId],
    ) -> Result<(), RewriteError> {
        let mut resolution = None;
        for parent in parents {
            if let Some(resolved) = self.resolve_parent(&id, parent)? {
                resolution = Some(resolved);
                break;
            }
        }
        self.discarded.insert(id.clone());
        self.resolve_memo.insert(id, resolution);
        Ok(())
    }

    /// The nearest rewritten ancestor of `parent`, or `None` when its
    /// whole ancestry was discarded. A parent outside the processed range
    /// resolves to itself (the original link is kept).
    fn resolve_parent(
        &mut self,
        current: &CommitId,
        parent: &CommitId,
    ) -> Result<Option<CommitId>, RewriteError> {
        if let Some(image) = self.commit_map.get(parent) {
            return Ok(Some(image.clone()));
        }
        if self.discarded.contains(parent) {
            return Ok(self.resolve_memo.get(parent).cloned().unwrap());
        }
        if self.in_range.contains(parent) {
            return Err(RewriteError::ParentRemapFailure {
                commit: current.clone(),
                parent: parent.clone(),
            });
        }
        Ok(Some(parent.clone()))
    }

    fn tree_of(&mut self, id: &CommitId) -> Result<TreeId, RewriteError> {
        if let Some(tree) = self.tree_cache.get(id) {
            return Ok(tree.clone());
        }
        let tree = self.store.read_commit(id)?.tree;
        self.tree_cache.insert(id.clone(), tree.clone());
        Ok(tree)
    }
}
