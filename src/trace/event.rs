//! Event records.
//!
//! Every record carries its timestamp and the local handles of the
//! definitions it references. Handles are translated to unified ones by
//! readers through the mapping tables in the local definition files.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::definitions::{AttributeHandle, MetricHandle, ParameterHandle, RegionHandle, StringHandle};
use crate::types::Paradigm;

/// A metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// Signed integer sample.
    Int64(i64),
    /// Unsigned integer sample.
    Uint64(u64),
    /// Floating-point sample.
    Double(f64),
}

/// Value of an attribute attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Signed integer.
    Int64(i64),
    /// Unsigned integer.
    Uint64(u64),
    /// Floating point.
    Double(f64),
    /// Interned string.
    String(StringHandle),
    /// A region.
    Region(RegionHandle),
    /// A location, by global id.
    Location(u64),
}

/// An attribute and its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Which attribute.
    pub attribute: AttributeHandle,
    /// Its value.
    pub value: AttributeValue,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A region was entered.
    Enter {
        /// The region.
        region: RegionHandle,
    },
    /// A region was left.
    Leave {
        /// The region.
        region: RegionHandle,
    },
    /// A fork/join thread requested a team.
    ThreadFork {
        /// Threading paradigm.
        paradigm: Paradigm,
        /// Requested team size.
        requested: u32,
    },
    /// A team member started.
    ThreadTeamBegin {
        /// Threading paradigm.
        paradigm: Paradigm,
        /// Actual team size.
        team_size: u32,
    },
    /// A team member finished.
    ThreadTeamEnd {
        /// Threading paradigm.
        paradigm: Paradigm,
        /// Actual team size.
        team_size: u32,
    },
    /// The forking thread joined its team.
    ThreadJoin {
        /// Threading paradigm.
        paradigm: Paradigm,
    },
    /// A thread was created.
    ThreadCreate {
        /// Threading paradigm.
        paradigm: Paradigm,
        /// Process-wide sequence count pairing create, begin, end and wait.
        sequence: u32,
    },
    /// A created thread began.
    ThreadBegin {
        /// Threading paradigm.
        paradigm: Paradigm,
        /// Sequence count of the matching create.
        sequence: u32,
    },
    /// A created thread ended.
    ThreadEnd {
        /// Threading paradigm.
        paradigm: Paradigm,
        /// Sequence count of the matching create.
        sequence: u32,
    },
    /// A created thread was waited for.
    ThreadWait {
        /// Threading paradigm.
        paradigm: Paradigm,
        /// Sequence count of the matching create.
        sequence: u32,
    },
    /// A metric sample.
    Metric {
        /// The metric.
        metric: MetricHandle,
        /// The sample.
        value: MetricValue,
    },
    /// An integer region parameter.
    ParameterInt {
        /// The parameter.
        parameter: ParameterHandle,
        /// Its value.
        value: i64,
    },
    /// An unsigned region parameter.
    ParameterUint {
        /// The parameter.
        parameter: ParameterHandle,
        /// Its value.
        value: u64,
    },
    /// A string region parameter.
    ParameterString {
        /// The parameter.
        parameter: ParameterHandle,
        /// Its value.
        value: StringHandle,
    },
    /// The buffer was flushed during measurement.
    BufferFlush {
        /// Time of the last record before the flush.
        start: u64,
        /// Time the flush completed.
        stop: u64,
    },
}

impl TraceEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Enter { .. } => "Enter",
            Self::Leave { .. } => "Leave",
            Self::ThreadFork { .. } => "ThreadFork",
            Self::ThreadTeamBegin { .. } => "ThreadTeamBegin",
            Self::ThreadTeamEnd { .. } => "ThreadTeamEnd",
            Self::ThreadJoin { .. } => "ThreadJoin",
            Self::ThreadCreate { .. } => "ThreadCreate",
            Self::ThreadBegin { .. } => "ThreadBegin",
            Self::ThreadEnd { .. } => "ThreadEnd",
            Self::ThreadWait { .. } => "ThreadWait",
            Self::Metric { .. } => "Metric",
            Self::ParameterInt { .. } => "ParameterInt",
            Self::ParameterUint { .. } => "ParameterUint",
            Self::ParameterString { .. } => "ParameterString",
            Self::BufferFlush { .. } => "BufferFlush",
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter { region } => write!(f, "Enter({region})"),
            Self::Leave { region } => write!(f, "Leave({region})"),
            Self::BufferFlush { start, stop } => write!(f, "BufferFlush({start}..{stop})"),
            other => f.write_str(other.name()),
        }
    }
}

/// One record of an event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Timer ticks.
    pub timestamp: u64,
    /// Attributes attached by `add_attribute` before the event.
    pub attributes: Vec<Attribute>,
    /// The event.
    pub event: TraceEvent,
}

impl EventRecord {
    /// A record without attributes.
    #[must_use]
    pub const fn new(timestamp: u64, event: TraceEvent) -> Self {
        Self {
            timestamp,
            attributes: Vec::new(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_regions() {
        let event = TraceEvent::Enter {
            region: RegionHandle::from_raw(3),
        };
        assert_eq!(event.to_string(), "Enter(R3)");
        assert_eq!(
            TraceEvent::ThreadJoin {
                paradigm: Paradigm::OpenMp
            }
            .to_string(),
            "ThreadJoin"
        );
    }

    #[test]
    fn attributes_travel_with_the_record() {
        let plain = EventRecord::new(5, TraceEvent::Leave { region: RegionHandle::from_raw(1) });
        let mut tagged = plain.clone();
        tagged.attributes.push(Attribute {
            attribute: AttributeHandle::from_raw(0),
            value: AttributeValue::Uint64(9),
        });
        let plain_bytes = rmp_serde::to_vec(&plain).unwrap();
        let tagged_bytes = rmp_serde::to_vec(&tagged).unwrap();
        assert!(plain_bytes.len() < tagged_bytes.len());
        let back: EventRecord = rmp_serde::from_slice(&tagged_bytes).unwrap();
        assert_eq!(back, tagged);
    }
}
