//! Wait-for graph and cycle detection.

use std::collections::{HashMap, HashSet};

use crate::transaction::TransactionId;

/// Directed graph where an edge `a -> b` means `a` is blocked on a lock
/// that `b` holds in a conflicting mode.
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a wait-for edge. Self edges are ignored.
    pub fn add_edge(&mut self, waiter: TransactionId, holder: TransactionId) {
        if waiter != holder {
            self.edges.entry(waiter).or_default().insert(holder);
        }
    }

    pub fn waits_for(&self, tid: TransactionId) -> impl Iterator<Item = TransactionId> + '_ {
        self.edges.get(&tid).into_iter().flatten().copied()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    /// Finds a cycle that passes through `start`, returned as the path
    /// `start -> ... -> last` where `last` waits for `start`.
    ///
    /// Iterative depth-first search; no recursion.
    pub fn find_cycle_through(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        let mut parent: HashMap<TransactionId, TransactionId> = HashMap::new();
        let mut visited: HashSet<TransactionId> = HashSet::new();
        let mut stack = vec![start];
        visited.insert(start);

        while let Some(current) = stack.pop() {
            for next in self.waits_for(current) {
                if next == start {
                    let mut path = vec![current];
                    let mut node = current;
                    while let Some(&p) = parent.get(&node) {
                        path.push(p);
                        node = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                if visited.insert(next) {
                    parent.insert(next, current);
                    stack.push(next);
                }
            }
        }

        None
    }

    pub fn has_cycle_through(&self, start: TransactionId) -> bool {
        self.find_cycle_through(start).is_some()
    }
}
