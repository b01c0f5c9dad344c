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

use rayon::iter::IntoParallelIterator;
use rayon::prelude::ParallelIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Parallel,
    Serial,
}

/// Fans a batch of independent tasks out over the rayon worker pool, or
/// runs them synchronously on the caller when serial mode is selected.
///
/// Returning from [`Scheduler::try_run`] is the synchronisation barrier:
/// no task outlives the call.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    mode: ExecutionMode,
}

impl Scheduler {
    pub fn new(mode: ExecutionMode) -> Self {
        Scheduler { mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Applies `f` to every item, collecting results in item order. The
    /// first error wins; remaining tasks may or may not run.
    pub fn try_run<T, R, E, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, E>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Send + Sync,
    {
        match self.mode {
            ExecutionMode::Parallel => items.into_par_iter().map(f).collect(),
            ExecutionMode::Serial => items.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_serial_runs_all_in_order() {
        let scheduler = Scheduler::new(ExecutionMode::Serial);
        let result: Result<Vec<_>, ()> = scheduler.try_run(vec![1, 2, 3], |i| Ok(i * 2));
        assert_eq!(result.unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn test_parallel_preserves_item_order() {
        let scheduler = Scheduler::new(ExecutionMode::Parallel);
        let items: Vec<usize> = (0..100).collect();
        let result: Result<Vec<_>, ()> = scheduler.try_run(items, |i| Ok(i + 1));
        assert_eq!(result.unwrap(), (1..101).collect::<Vec<_>>());
    }

    #[test]
    fn test_all_tasks_complete_before_return() {
        let counter = AtomicUsize::new(0);
        let scheduler = Scheduler::new(ExecutionMode::Parallel);
        let result: Result<Vec<_>, ()> = scheduler.try_run((0..64).collect(), |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_error_propagates() {
        let scheduler = Scheduler::new(ExecutionMode::Parallel);
        let result = scheduler.try_run((0..10).collect(), |i: i32| {
            if i == 5 {
                Err("boom")
            } else {
                Ok(i)
            }
        });
        assert_eq!(result.unwrap_err(), "boom");
    }
}
