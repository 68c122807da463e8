//! Typed definition handles.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::kinds::{
    AttributeDef, CommunicatorDef, GroupDef, LocationDef, LocationGroupDef, MetricDef,
    ParameterDef, RegionDef, RmaWindowDef, SourceFileDef, StringDef,
};
use super::Definition;

/// Sequence number of a definition within one manager, typed by its kind.
///
/// A handle is only meaningful for the manager that issued it. Local and
/// unified handles share this type; the mapping tables produced by
/// unification translate one into the other.
pub struct Handle<D> {
    id: u32,
    kind: PhantomData<fn() -> D>,
}

impl<D> Handle<D> {
    /// The "no definition" value.
    pub const INVALID: Self = Self::from_raw(u32::MAX);

    /// Wraps a raw sequence number.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self {
            id,
            kind: PhantomData,
        }
    }

    /// Returns the sequence number.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// True unless this is [`Handle::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.id != u32::MAX
    }

    pub(crate) const fn index(self) -> usize {
        self.id as usize
    }
}

impl Handle<StringDef> {
    /// The empty string, the first definition of every manager.
    pub const EMPTY: Self = Self::from_raw(0);
}

impl Handle<RegionDef> {
    /// Sentinel pushed on the region stack for filtered regions.
    ///
    /// It never names a definition and never reaches the trace.
    pub const FILTERED: Self = Self::from_raw(u32::MAX - 1);

    /// True for the filtered-region sentinel.
    #[must_use]
    pub const fn is_filtered(self) -> bool {
        self.id == Self::FILTERED.id
    }
}

impl<D> Clone for Handle<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for Handle<D> {}

impl<D> PartialEq for Handle<D> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<D> Eq for Handle<D> {}

impl<D> PartialOrd for Handle<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D> Ord for Handle<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<D> Hash for Handle<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.id);
    }
}

impl<D: Definition> fmt::Debug for Handle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            u32::MAX => write!(f, "{}(invalid)", D::KIND),
            id => write!(f, "{}({id})", D::KIND),
        }
    }
}

impl<D: Definition> fmt::Display for Handle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", D::KIND.prefix(), self.id)
    }
}

impl<D> Serialize for Handle<D> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.id)
    }
}

impl<'de, D> Deserialize<'de> for Handle<D> {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        u32::deserialize(deserializer).map(Self::from_raw)
    }
}

/// Handle of a [`StringDef`].
pub type StringHandle = Handle<StringDef>;
/// Handle of a [`SourceFileDef`].
pub type SourceFileHandle = Handle<SourceFileDef>;
/// Handle of a [`RegionDef`].
pub type RegionHandle = Handle<RegionDef>;
/// Handle of a [`GroupDef`].
pub type GroupHandle = Handle<GroupDef>;
/// Handle of an [`AttributeDef`].
pub type AttributeHandle = Handle<AttributeDef>;
/// Handle of a [`ParameterDef`].
pub type ParameterHandle = Handle<ParameterDef>;
/// Handle of a [`MetricDef`].
pub type MetricHandle = Handle<MetricDef>;
/// Handle of a [`CommunicatorDef`].
pub type CommunicatorHandle = Handle<CommunicatorDef>;
/// Handle of an [`RmaWindowDef`].
pub type RmaWindowHandle = Handle<RmaWindowDef>;
/// Handle of a [`LocationDef`].
pub type LocationHandle = Handle<LocationDef>;
/// Handle of a [`LocationGroupDef`].
pub type LocationGroupHandle = Handle<LocationGroupDef>;
