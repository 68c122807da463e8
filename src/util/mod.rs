//! Internal utilities: the slot arena behind task and frame pools, and the
//! deterministic hasher behind definition tables.

pub mod arena;
pub mod det_hash;

pub use arena::{Arena, ArenaIndex};
pub use det_hash::DetHasher;
