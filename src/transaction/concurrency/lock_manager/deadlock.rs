use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use log::{debug, warn};

use crate::common::types::TxnId;
use crate::transaction::concurrency::transaction::TransactionState;

use super::queue::LockMode;
use super::LockManager;

/// Waits-for graph between transactions: an edge `a -> b` means `a` is
/// blocked on a lock `b` holds.
pub(crate) struct WaitsForGraph {
    edges: HashMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self {
            edges: HashMap::new(),
        }
    }

    pub fn add_edge(&mut self, from: TxnId, to: TxnId) {
        let adjacent = self.edges.entry(from).or_default();
        if !adjacent.contains(&to) {
            adjacent.push(to);
        }
    }

    pub fn remove_edge(&mut self, from: TxnId, to: TxnId) {
        if let Some(adjacent) = self.edges.get_mut(&from) {
            adjacent.retain(|&t| t != to);
        }
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    #[cfg(test)]
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let mut edges: Vec<(TxnId, TxnId)> = self
            .edges
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
            .collect();
        edges.sort();
        edges
    }

    /// Find any cycle, exploring transaction ids in ascending order (both
    /// the DFS roots and each adjacency list) so detection is deterministic.
    /// Returns the cycle's vertices in path order.
    pub fn find_cycle(&self) -> Option<Vec<TxnId>> {
        let mut sources: Vec<TxnId> = self.edges.keys().copied().collect();
        sources.sort_unstable();

        let mut visited = HashSet::new();
        let mut path = Vec::new();
        for source in sources {
            if let Some(cycle) = self.dfs(source, &mut visited, &mut path) {
                return Some(cycle);
            }
            debug_assert!(path.is_empty());
        }
        None
    }

    fn dfs(
        &self,
        txn_id: TxnId,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        if let Some(pos) = path.iter().position(|&t| t == txn_id) {
            return Some(path[pos..].to_vec());
        }
        if !visited.insert(txn_id) {
            return None;
        }

        path.push(txn_id);
        let mut adjacent = self.edges.get(&txn_id).cloned().unwrap_or_default();
        adjacent.sort_unstable();
        for next in adjacent {
            if let Some(cycle) = self.dfs(next, visited, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }
}

impl LockManager {
    /// Spawn the background deadlock detector. The thread holds only a weak
    /// reference, so dropping the manager also shuts it down.
    pub fn start_deadlock_detection(self: &Arc<Self>) {
        let running = self.running_flag().clone();
        if running.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.detection_interval();

        let handle = thread::spawn(move || loop {
            thread::sleep(interval);
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let Some(manager) = weak.upgrade() else {
                break;
            };
            manager.run_detection_pass();
        });
        *self.detector_handle().lock() = Some(handle);
    }

    /// Stop and join the background detector
    pub fn stop_deadlock_detection(&self) {
        self.running_flag().store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle().lock().take() {
            let _ = handle.join();
        }
    }

    /// One detection sweep: snapshot both lock maps into a waits-for graph,
    /// then break every cycle by aborting its youngest member (highest txn
    /// id), removing the closing edge, and waking the victim's queues.
    pub fn run_detection_pass(&self) {
        let mut graph = self.graph().lock();
        graph.clear();

        let (table_map, row_map) = self.maps();
        let table_map = table_map.lock();
        let row_map = row_map.lock();

        for queue in table_map.values().chain(row_map.values()) {
            let inner = queue.inner.lock();
            for waiting in inner.requests.iter().filter(|r| !r.granted) {
                for granted in inner.requests.iter().filter(|r| r.granted) {
                    if !LockMode::compatible(granted.mode, waiting.mode) {
                        graph.add_edge(waiting.txn_id, granted.txn_id);
                    }
                }
            }
        }

        while let Some(cycle) = graph.find_cycle() {
            let victim = *cycle.iter().max().expect("cycle is non-empty");
            let victim_pos = cycle.iter().position(|&t| t == victim).expect("victim on cycle");
            let closing_edge_target = cycle[(victim_pos + 1) % cycle.len()];
            warn!(
                "deadlock cycle {:?}: aborting txn {}, dropping edge {} -> {}",
                cycle, victim, victim, closing_edge_target
            );

            graph.remove_edge(victim, closing_edge_target);
            if let Some(txn) = self.registry().lock().get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }

            for queue in table_map.values().chain(row_map.values()) {
                let has_victim = queue.inner.lock().has_waiting(victim);
                if has_victim {
                    queue.cv.notify_all();
                }
            }
        }

        graph.clear();
        debug!("deadlock detection pass complete");
    }
}
