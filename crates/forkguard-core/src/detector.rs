//! Event intake: the pipeline run for every process creation.
//!
//! ```text
//! record birth -> ancestor lookup -+-> not found: LookupMiss
//!                                  +-> name check -+-> no match: NameMismatch
//!                                                  +-> ancestor birth -+-> unknown: AncestorUntracked
//!                                                                      +-> timing -> enforcement -> telemetry
//! ```
//!
//! Only the last branch publishes a [`DecisionEvent`], whatever the verdict.

use std::sync::atomic::{AtomicU64, Ordering};

use host_common::{Pid, time::Timestamp};
use serde::Serialize;

use crate::{
    config::DetectorConfig,
    enforcement::{self, Enforcer},
    lineage::{self, ProcessHandle},
    name,
    store::BirthTimeStore,
    telemetry::{DecisionEvent, TelemetryEmitter},
    timing,
};

/// A process creation, as delivered by the intake mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationEvent {
    pub pid: Pid,
    pub parent_pid: Pid,
    pub timestamp: Timestamp,
}

/// Terminal state reached by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The lineage is shorter than the configured depth.
    LookupMiss,
    /// The ancestor has a different name.
    NameMismatch { ancestor_pid: Pid },
    /// The ancestor birth time is not in the store: it was created before we
    /// started or its record was evicted.
    AncestorUntracked { ancestor_pid: Pid },
    Decided(DecisionEvent),
}

pub struct Detector<E> {
    config: DetectorConfig,
    store: BirthTimeStore,
    enforcer: E,
    telemetry: TelemetryEmitter,
    stats: Stats,
}

impl<E: Enforcer> Detector<E> {
    pub fn new(config: DetectorConfig, enforcer: E, telemetry: TelemetryEmitter) -> Self {
        let store = BirthTimeStore::with_shards(config.store_capacity, config.store_shards);
        log::debug!(
            "detector ready: depth {}, min interval {}ns, store capacity {}",
            config.effective_depth(),
            config.min_interval_ns,
            store.capacity()
        );
        Self {
            config,
            store,
            enforcer,
            telemetry,
            stats: Stats::default(),
        }
    }

    pub fn store(&self) -> &BirthTimeStore {
        &self.store
    }

    /// Run the pipeline for a new process. Never fails and never blocks.
    pub fn on_process_created<H: ProcessHandle>(&self, subject: &H, event: CreationEvent) -> Outcome {
        self.stats.events.fetch_add(1, Ordering::Relaxed);
        if let Some(evicted) = self.store.record_birth(event.pid, event.timestamp) {
            log::trace!("birth time of {evicted} evicted to make room for {}", event.pid);
        }

        let Some(ancestor) = lineage::ancestor_at(
            subject,
            self.config.ancestor_depth,
            self.config.max_lineage_steps,
        ) else {
            self.stats.lookup_misses.fetch_add(1, Ordering::Relaxed);
            log::trace!("{}: no ancestor {} generations back", event.pid, self.config.ancestor_depth);
            return Outcome::LookupMiss;
        };
        let ancestor_pid = ancestor.pid();

        let subject_name = subject.name();
        let ancestor_name = ancestor.name();
        if !name::same_name(&subject_name, &ancestor_name) {
            self.stats.name_mismatches.fetch_add(1, Ordering::Relaxed);
            return Outcome::NameMismatch { ancestor_pid };
        }

        let Some(ancestor_birth) = self.store.lookup(ancestor_pid) else {
            self.stats.untracked_ancestors.fetch_add(1, Ordering::Relaxed);
            log::trace!("{}: birth time of ancestor {ancestor_pid} unknown", event.pid);
            return Outcome::AncestorUntracked { ancestor_pid };
        };
        // a sibling may have overwritten our record in the meantime
        let subject_birth = self.store.lookup(event.pid).unwrap_or(event.timestamp);

        let delta_ns = timing::delta(subject_birth, ancestor_birth);
        let burst = timing::is_burst(delta_ns, self.config.min_interval_ns);
        let killed = enforcement::decide(true, burst);

        if killed {
            self.stats.kills.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "terminating {} ({subject_name}): created {delta_ns}ns after ancestor {ancestor_pid}",
                event.pid
            );
            self.enforcer.request_termination(event.pid);
        } else {
            log::debug!(
                "{} ({subject_name}) created {delta_ns}ns after ancestor {ancestor_pid}, allowed",
                event.pid
            );
        }

        let decision = DecisionEvent {
            pid: event.pid,
            name: subject_name,
            ancestor_pid,
            ancestor_name,
            parent_pid: event.parent_pid,
            delta_ns,
            killed,
        };
        self.stats.decisions.fetch_add(1, Ordering::Relaxed);
        self.telemetry.emit(decision.clone());
        Outcome::Decided(decision)
    }

    pub fn stats(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            events: load(&self.stats.events),
            lookup_misses: load(&self.stats.lookup_misses),
            name_mismatches: load(&self.stats.name_mismatches),
            untracked_ancestors: load(&self.stats.untracked_ancestors),
            decisions: load(&self.stats.decisions),
            kills: load(&self.stats.kills),
            telemetry_dropped: self.telemetry.dropped(),
            tracked_processes: self.store.len(),
        }
    }
}

#[derive(Default)]
struct Stats {
    events: AtomicU64,
    lookup_misses: AtomicU64,
    name_mismatches: AtomicU64,
    untracked_ancestors: AtomicU64,
    decisions: AtomicU64,
    kills: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events: u64,
    pub lookup_misses: u64,
    pub name_mismatches: u64,
    pub untracked_ancestors: u64,
    pub decisions: u64,
    pub kills: u64,
    pub telemetry_dropped: u64,
    pub tracked_processes: usize,
}
