//! Tag types carried by definitions and events.
//!
//! These are plain enums shared by every module: the paradigm an adapter
//! belongs to, the kind of a region, group, location or attribute, and the
//! value types of metrics and parameters.

mod tags;

pub use tags::{
    AttributeType, GroupType, LocationGroupType, LocationType, MetricValueType, Paradigm,
    ParadigmClass, ParameterType, RegionType,
};
