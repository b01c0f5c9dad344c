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

//! Rebuilds a commit's tree under the keep/remove pattern sets.
//!
//! The source tree is walked depth-first into a flat list of leaves; the
//! keep phase and the remove phase then evaluate leaves independently
//! (possibly in parallel), and the surviving working set is materialised
//! bottom-up as new tree objects.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use thiserror::Error;
use tracing::instrument;

use crate::object_id::ObjectId as _;
use crate::patterns::{MatchedRule, PatternSet};
use crate::predicate::{EntryInfo, EntryKind, MutableCommit, MutableEntry, PredicateRuntimeError};
use crate::scheduler::Scheduler;
use crate::store::{Store, StoreError, StoreResult, Tree, TreeId, TreeValue};

#[derive(Debug, Error)]
pub enum TreeFilterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Predicate(#[from] PredicateRuntimeError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum TreeFilterOutcome {
    Rebuilt(TreeId),
    /// Every leaf was evicted; the rewriter discards the commit.
    EmptyWorkingSet,
    /// A predicate set `commit.discard` during tree evaluation.
    CommitDiscarded,
}

/// One leaf of the source tree. The per-walk index doubles as the leaf's
/// identity in the working set, so a decision is attributable to the
/// latest visit even when the same path matches several rules.
#[derive(Debug)]
struct Leaf {
    index: usize,
    path: String,
    name: String,
    value: TreeValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Keep,
    Remove,
}

#[instrument(skip_all, fields(tree = %tree_id.hex()))]
pub fn rebuild_tree(
    store: &Store,
    scheduler: &Scheduler,
    keep: &PatternSet,
    remove: &PatternSet,
    commit: &Mutex<MutableCommit>,
    tree_id: &TreeId,
    include_links: bool,
) -> Result<TreeFilterOutcome, TreeFilterError> {
    let mut leaves = vec![];
    collect_leaves(store, tree_id, "", include_links, &mut leaves)?;
    let working: Mutex<HashMap<usize, TreeValue>> = Mutex::new(HashMap::new());

    if keep.is_empty() {
        let mut working = working.lock().unwrap();
        for leaf in &leaves {
            working.insert(leaf.index, leaf.value.clone());
        }
    } else {
        scheduler.try_run((0..leaves.len()).collect(), |i| {
            evaluate_entry(store, keep, &leaves[i], Polarity::Keep, commit, &working)
        })?;
        if commit.lock().unwrap().discard {
            return Ok(TreeFilterOutcome::CommitDiscarded);
        }
    }

    if !remove.is_empty() {
        let current: Vec<usize> = working.lock().unwrap().keys().copied().collect();
        scheduler.try_run(current, |i| {
            evaluate_entry(store, remove, &leaves[i], Polarity::Remove, commit, &working)
        })?;
        if commit.lock().unwrap().discard {
            return Ok(TreeFilterOutcome::CommitDiscarded);
        }
    }

    let working = working.into_inner().unwrap();
    if working.is_empty() {
        return Ok(TreeFilterOutcome::EmptyWorkingSet);
    }
    let entries = working
        .into_iter()
        .map(|(index, value)| (leaves[index].path.clone(), value));
    let new_tree_id = write_nested_trees(store, entries)?;
    Ok(TreeFilterOutcome::Rebuilt(new_tree_id))
}

fn collect_leaves(
    store: &Store,
    tree_id: &TreeId,
    prefix: &str,
    include_links: bool,
    leaves: &mut Vec<Leaf>,
) -> StoreResult<()> {
    let tree = store.read_tree(tree_id)?;
    for (name, value) in tree.entries() {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match value {
            TreeValue::Tree(sub_tree_id) => {
                collect_leaves(store, sub_tree_id, &path, include_links, leaves)?;
            }
            TreeValue::Submodule(_) if !include_links => {}
            other => {
                leaves.push(Leaf {
                    index: leaves.len(),
                    path,
                    name: name.clone(),
                    value: other.clone(),
                });
            }
        }
    }
    Ok(())
}

fn leaf_info(store: &Store, leaf: &Leaf) -> StoreResult<EntryInfo> {
    let (kind, size, is_binary) = match &leaf.value {
        TreeValue::File { id, executable } => {
            let (size, is_binary) = store.blob_info(id)?;
            (
                EntryKind::File {
                    executable: *executable,
                },
                size,
                is_binary,
            )
        }
        TreeValue::Symlink(id) => {
            let (size, is_binary) = store.blob_info(id)?;
            (EntryKind::Symlink, size, is_binary)
        }
        // Links have no blob; size predicates see the 0 sentinel.
        TreeValue::Submodule(_) => (EntryKind::Submodule, 0, false),
        TreeValue::Tree(_) => panic!("tree entries are recursed, never evaluated"),
    };
    Ok(EntryInfo {
        path: leaf.path.clone(),
        name: leaf.name.clone(),
        kind,
        size,
        is_binary,
    })
}

fn evaluate_entry(
    store: &Store,
    patterns: &PatternSet,
    leaf: &Leaf,
    polarity: Polarity,
    commit: &Mutex<MutableCommit>,
    working: &Mutex<HashMap<usize, TreeValue>>,
) -> Result<(), TreeFilterError> {
    let Some(matched) = patterns.match_path(&leaf.path) else {
        return Ok(());
    };
    match matched {
        MatchedRule::Pure => match polarity {
            Polarity::Keep => {
                working
                    .lock()
                    .unwrap()
                    .insert(leaf.index, leaf.value.clone());
            }
            Polarity::Remove => {
                working.lock().unwrap().remove(&leaf.index);
            }
        },
        MatchedRule::Scripted(rule) => {
            let default_discard = polarity == Polarity::Remove;
            let mut entry = MutableEntry::new(leaf_info(store, leaf)?, default_discard);
            {
                let mut commit = commit.lock().unwrap();
                rule.predicate
                    .invoke(store, &rule.glob, &mut commit, &mut entry)?;
                if commit.discard {
                    // The caller notices the flag after the phase barrier.
                    return Ok(());
                }
            }
            // Reaffirming the phase default admits for keep and evicts for
            // remove; flipping it does the opposite. Both cases reduce to
            // the final value of the discard field.
            if entry.discard {
                working.lock().unwrap().remove(&leaf.index);
            } else if let Some(bytes) = entry.take_replacement() {
                let id = store.write_blob(&bytes)?;
                let executable = match &leaf.value {
                    TreeValue::File { executable, .. } => *executable,
                    _ => false,
                };
                working
                    .lock()
                    .unwrap()
                    .insert(leaf.index, TreeValue::File { id, executable });
            } else {
                // Keeps a replacement recorded by an earlier phase.
                working
                    .lock()
                    .unwrap()
                    .entry(leaf.index)
                    .or_insert_with(|| leaf.value.clone());
            }
        }
    }
    Ok(())
}

#[derive(Debug)]
enum Node {
    Leaf(TreeValue),
    Dir(BTreeMap<String, Node>),
}

fn write_nested_trees(
    store: &Store,
    entries: impl Iterator<Item = (String, TreeValue)>,
) -> StoreResult<TreeId> {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();
    for (path, value) in entries {
        let mut components: Vec<&str> = path.split('/').collect();
        let file_name = components.pop().unwrap();
        let mut map = &mut root;
        for component in components {
            let node = map
                .entry(component.to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            map = match node {
                Node::Dir(sub) => sub,
                // Paths come from a single git tree, which cannot contain
                // both a file and a directory of the same name.
                Node::Leaf(_) => panic!("path {path:?} is both file and directory"),
            };
        }
        map.insert(file_name.to_string(), Node::Leaf(value));
    }
    write_dir(store, &root)
}

fn write_dir(store: &Store, map: &BTreeMap<String, Node>) -> StoreResult<TreeId> {
    let mut tree = Tree::default();
    for (name, node) in map {
        let value = match node {
            Node::Leaf(value) => value.clone(),
            Node::Dir(sub) => TreeValue::Tree(write_dir(store, sub)?),
        };
        tree.set(name.clone(), value);
    }
    store.write_tree(&tree)
}
