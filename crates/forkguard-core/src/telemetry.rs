//! Decision events and the channel publishing them.
//!
//! The [`TelemetryEmitter`] never waits for the consumer: with a full channel
//! the newest event is dropped and counted.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{Buf, BufMut};
use host_common::Pid;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::name::{ProcessName, TASK_COMM_LEN};

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionEvent {
    #[serde(serialize_with = "serialize_pid")]
    pub pid: Pid,
    pub name: ProcessName,
    #[serde(serialize_with = "serialize_pid")]
    pub ancestor_pid: Pid,
    pub ancestor_name: ProcessName,
    #[serde(serialize_with = "serialize_pid")]
    pub parent_pid: Pid,
    pub delta_ns: u64,
    pub killed: bool,
}

fn serialize_pid<S: Serializer>(pid: &Pid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i32(pid.as_raw())
}

impl fmt::Display for DecisionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match (self.killed, f.alternate()) {
            (true, true) => "\x1b[1;30;41mKILLED\x1b[0m",
            (true, false) => "KILLED",
            (false, true) => "\x1b[1;30;46mALLOWED\x1b[0m",
            (false, false) => "ALLOWED",
        };
        write!(
            f,
            "[{verdict} {} ({})] parent={} ancestor={} ({}) delta={}ms",
            self.name,
            self.pid,
            self.parent_pid,
            self.ancestor_name,
            self.ancestor_pid,
            self.delta_ns / 1_000_000
        )
    }
}

/// Fixed layout record for consumers living in another process:
///
/// | field           | size |
/// |-----------------|------|
/// | pid             | u32  |
/// | parent pid      | u32  |
/// | name            | 16   |
/// | ancestor name   | 16   |
/// | delta ns        | u64  |
/// | killed          | u8   |
///
/// Integers are little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireRecord {
    pub pid: u32,
    pub parent_pid: u32,
    pub comm: [u8; TASK_COMM_LEN],
    pub ancestor_comm: [u8; TASK_COMM_LEN],
    pub delta_ns: u64,
    pub killed: bool,
}

pub const WIRE_RECORD_SIZE: usize = 4 + 4 + TASK_COMM_LEN + TASK_COMM_LEN + 8 + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("record truncated: {available} of {required} bytes")]
    Truncated { available: usize, required: usize },
    #[error("invalid killed flag {0}")]
    InvalidFlag(u8),
}

impl From<&DecisionEvent> for WireRecord {
    fn from(event: &DecisionEvent) -> Self {
        Self {
            pid: event.pid.as_raw() as u32,
            parent_pid: event.parent_pid.as_raw() as u32,
            comm: event.name.to_comm(),
            ancestor_comm: event.ancestor_name.to_comm(),
            delta_ns: event.delta_ns,
            killed: event.killed,
        }
    }
}

impl WireRecord {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.pid);
        buf.put_u32_le(self.parent_pid);
        buf.put_slice(&self.comm);
        buf.put_slice(&self.ancestor_comm);
        buf.put_u64_le(self.delta_ns);
        buf.put_u8(self.killed as u8);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < WIRE_RECORD_SIZE {
            return Err(WireError::Truncated {
                available: buf.remaining(),
                required: WIRE_RECORD_SIZE,
            });
        }
        let pid = buf.get_u32_le();
        let parent_pid = buf.get_u32_le();
        let mut comm = [0; TASK_COMM_LEN];
        buf.copy_to_slice(&mut comm);
        let mut ancestor_comm = [0; TASK_COMM_LEN];
        buf.copy_to_slice(&mut ancestor_comm);
        let delta_ns = buf.get_u64_le();
        let killed = match buf.get_u8() {
            0 => false,
            1 => true,
            x => return Err(WireError::InvalidFlag(x)),
        };
        Ok(Self {
            pid,
            parent_pid,
            comm,
            ancestor_comm,
            delta_ns,
            killed,
        })
    }

    pub fn name(&self) -> ProcessName {
        ProcessName::new(&self.comm)
    }

    pub fn ancestor_name(&self) -> ProcessName {
        ProcessName::new(&self.ancestor_comm)
    }
}

/// Create the telemetry channel. The capacity is at least one event.
pub fn channel(capacity: usize) -> (TelemetryEmitter, mpsc::Receiver<DecisionEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TelemetryEmitter {
            tx,
            dropped: AtomicU64::new(0),
        },
        rx,
    )
}

pub struct TelemetryEmitter {
    tx: mpsc::Sender<DecisionEvent>,
    dropped: AtomicU64,
}

impl TelemetryEmitter {
    /// Publish an event without waiting. Returns false if it was dropped.
    pub fn emit(&self, event: DecisionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    log::warn!(
                        "telemetry channel full, dropped decision for {} ({dropped} dropped so far)",
                        event.pid
                    );
                }
                false
            }
            Err(TrySendError::Closed(event)) => {
                log::trace!("telemetry consumer gone, dropping decision for {}", event.pid);
                false
            }
        }
    }

    /// Events dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn event(pid: i32, killed: bool) -> DecisionEvent {
        DecisionEvent {
            pid: Pid::from_raw(pid),
            name: "fbomb".into(),
            ancestor_pid: Pid::from_raw(pid - 3),
            ancestor_name: "fbomb".into(),
            parent_pid: Pid::from_raw(pid - 1),
            delta_ns: 100_000_000,
            killed,
        }
    }

    #[tokio::test]
    async fn events_reach_the_consumer() {
        let (emitter, mut rx) = channel(4);
        assert!(emitter.emit(event(13, true)));
        assert_eq!(rx.recv().await, Some(event(13, true)));
        assert_eq!(emitter.dropped(), 0);
    }

    #[tokio::test]
    async fn full_channel_drops_newest() {
        let (emitter, mut rx) = channel(2);
        assert!(emitter.emit(event(10, true)));
        assert!(emitter.emit(event(11, false)));
        assert!(!emitter.emit(event(12, true)));
        assert!(!emitter.emit(event(13, true)));
        assert_eq!(emitter.dropped(), 2);
        assert_eq!(rx.recv().await.unwrap().pid, Pid::from_raw(10));
        assert_eq!(rx.recv().await.unwrap().pid, Pid::from_raw(11));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_not_counted_as_full() {
        let (emitter, rx) = channel(1);
        drop(rx);
        assert!(!emitter.emit(event(10, true)));
        assert_eq!(emitter.dropped(), 0);
    }

    #[test]
    fn wire_layout() {
        let mut buf = BytesMut::new();
        WireRecord::from(&event(13, true)).encode(&mut buf);
        assert_eq!(buf.len(), WIRE_RECORD_SIZE);
        assert_eq!(&buf[..4], &13u32.to_le_bytes());
        assert_eq!(&buf[4..8], &12u32.to_le_bytes());
        assert_eq!(&buf[8..14], b"fbomb\0");
        assert_eq!(buf[WIRE_RECORD_SIZE - 1], 1);

        let record = WireRecord::decode(&mut buf.freeze()).unwrap();
        assert_eq!(record.name(), ProcessName::from("fbomb"));
        assert_eq!(record.ancestor_name(), ProcessName::from("fbomb"));
        assert_eq!(record.delta_ns, 100_000_000);
    }

    #[test]
    fn decode_rejects_bad_input() {
        let mut short = &[0u8; 10][..];
        assert_eq!(
            WireRecord::decode(&mut short),
            Err(WireError::Truncated {
                available: 10,
                required: WIRE_RECORD_SIZE
            })
        );

        let mut buf = BytesMut::new();
        WireRecord::from(&event(13, false)).encode(&mut buf);
        let last = buf.len() - 1;
        buf[last] = 7;
        assert_eq!(
            WireRecord::decode(&mut buf.freeze()),
            Err(WireError::InvalidFlag(7))
        );
    }

    #[test]
    fn json_form() {
        let json = serde_json::to_value(event(13, true)).unwrap();
        assert_eq!(json["pid"], 13);
        assert_eq!(json["name"], "fbomb");
        assert_eq!(json["ancestor_pid"], 10);
        assert_eq!(json["killed"], true);
    }
}
