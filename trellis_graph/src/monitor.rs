// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Observers of evaluation.
//!
//! Monitors installed with [`Graph::add_monitor`](crate::Graph::add_monitor)
//! are told about every hash and compute process that actually runs; cache
//! hits run no process and are not reported.

use core::time::Duration;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use trellis_context::ContentHash;

use crate::ids::PlugId;

/// Which half of evaluation a process performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcessType {
    /// `ComputeNode::hash`.
    Hash,
    /// `ComputeNode::compute`.
    Compute,
}

/// A finished process.
#[derive(Clone, Debug)]
pub struct ProcessInfo {
    /// Hash or compute.
    pub process_type: ProcessType,
    /// The output processed.
    pub plug: PlugId,
    /// Its full name.
    pub plug_name: String,
    /// Hash of the context it ran in.
    pub context_hash: ContentHash,
    /// Wall time, including upstream evaluation.
    pub duration: Duration,
    /// Context variables the process read, in first-read order.
    pub reads: Vec<Arc<str>>,
    /// Whether it produced a result.
    pub succeeded: bool,
}

/// Receives evaluation events. Called from whichever thread runs the
/// process, possibly many at once.
pub trait Monitor: Send + Sync {
    /// A process is about to run.
    fn process_started(&self, process_type: ProcessType, plug: PlugId) {
        let _ = (process_type, plug);
    }

    /// A process finished, successfully or not.
    fn process_finished(&self, info: &ProcessInfo);
}

/// Per-plug counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlugStatistics {
    /// Hash processes run.
    pub hash_count: usize,
    /// Compute processes run.
    pub compute_count: usize,
    /// Total hash time.
    pub hash_duration: Duration,
    /// Total compute time.
    pub compute_duration: Duration,
}

/// Counts processes and their time, per plug.
///
/// ```
/// use std::sync::Arc;
/// use trellis_graph::{Graph, PerformanceMonitor};
///
/// let mut graph = Graph::new();
/// let monitor = Arc::new(PerformanceMonitor::new());
/// graph.add_monitor(monitor.clone());
/// // ... evaluate ...
/// assert!(monitor.all_statistics().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    statistics: Mutex<HashMap<PlugId, PlugStatistics>>,
}

impl PerformanceMonitor {
    /// An empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `plug`; zero if it never ran.
    #[must_use]
    pub fn statistics(&self, plug: PlugId) -> PlugStatistics {
        self.statistics.lock().get(&plug).copied().unwrap_or_default()
    }

    /// Counters for every plug that ran.
    #[must_use]
    pub fn all_statistics(&self) -> Vec<(PlugId, PlugStatistics)> {
        let mut all: Vec<_> = self
            .statistics
            .lock()
            .iter()
            .map(|(plug, stats)| (*plug, *stats))
            .collect();
        all.sort_by_key(|(plug, _)| *plug);
        all
    }

    /// Forgets everything counted so far.
    pub fn clear(&self) {
        self.statistics.lock().clear();
    }
}

impl Monitor for PerformanceMonitor {
    fn process_finished(&self, info: &ProcessInfo) {
        let mut statistics = self.statistics.lock();
        let stats = statistics.entry(info.plug).or_default();
        match info.process_type {
            ProcessType::Hash => {
                stats.hash_count += 1;
                stats.hash_duration += info.duration;
            }
            ProcessType::Compute => {
                stats.compute_count += 1;
                stats.compute_duration += info.duration;
            }
        }
    }
}

/// A compute that read a context variable its hash did not.
///
/// Such a node can return stale values: two contexts differing only in that
/// variable share a hash, so the second request is served the first value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashCompletenessViolation {
    /// The output computed.
    pub plug: PlugId,
    /// Its full name.
    pub plug_name: String,
    /// The variable read by compute only.
    pub variable: Arc<str>,
}

/// Checks that computes read no context variable their hash ignored.
#[derive(Debug, Default)]
pub struct ContextSanitiser {
    hash_reads: Mutex<HashMap<(PlugId, ContentHash), Vec<Arc<str>>>>,
    violations: Mutex<Vec<HashCompletenessViolation>>,
}

impl ContextSanitiser {
    /// An empty sanitiser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Violations found so far, each reported once.
    #[must_use]
    pub fn violations(&self) -> Vec<HashCompletenessViolation> {
        self.violations.lock().clone()
    }
}

impl Monitor for ContextSanitiser {
    fn process_finished(&self, info: &ProcessInfo) {
        let key = (info.plug, info.context_hash);
        match info.process_type {
            ProcessType::Hash => {
                self.hash_reads.lock().insert(key, info.reads.clone());
            }
            ProcessType::Compute => {
                // Without a record of the hash there is nothing to compare.
                let Some(hash_reads) = self.hash_reads.lock().get(&key).cloned() else {
                    return;
                };
                let mut violations = self.violations.lock();
                for variable in &info.reads {
                    if hash_reads.contains(variable)
                        || violations
                            .iter()
                            .any(|v| v.plug == info.plug && v.variable == *variable)
                    {
                        continue;
                    }
                    tracing::warn!(
                        plug = %info.plug_name,
                        variable = %variable,
                        "context variable read by compute but not by hash"
                    );
                    violations.push(HashCompletenessViolation {
                        plug: info.plug,
                        plug_name: info.plug_name.clone(),
                        variable: variable.clone(),
                    });
                }
            }
        }
    }
}
