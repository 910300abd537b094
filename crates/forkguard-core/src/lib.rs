//! Decision engine of forkguard.
//!
//! Every process creation observed on the host goes through the
//! [`Detector`](detector::Detector), which:
//!
//! - records the birth time of the new process in a bounded, sharded
//!   [`BirthTimeStore`](store::BirthTimeStore)
//! - walks its lineage a configured number of generations back
//! - compares the name of the new process with the name of that ancestor
//! - checks whether the two were created within the minimum interval
//! - asks an [`Enforcer`](enforcement::Enforcer) to terminate the new process
//!   when both checks hold
//! - publishes a [`DecisionEvent`](telemetry::DecisionEvent) on a bounded channel
//!
//! The creation path of the host waits on this pipeline, so no step blocks
//! and no step can fail: every anomaly is absorbed locally and at most counted.

pub mod config;
pub mod detector;
pub mod enforcement;
pub mod lineage;
pub mod name;
pub mod store;
pub mod telemetry;
pub mod timing;

pub use config::{ConfigError, DETECTOR_CONFIG, DetectorConfig, ModuleConfig};
pub use detector::{CreationEvent, Detector, Outcome, StatsSnapshot};
pub use enforcement::{DryRun, Enforcer};
pub use lineage::ProcessHandle;
pub use name::ProcessName;
pub use store::BirthTimeStore;
pub use telemetry::{DecisionEvent, TelemetryEmitter};

pub use host_common::{Pid, time::Timestamp};
