//! Stable id types for world entities.
//!
//! Per-cell metadata stores these raw ids rather than owning references; the
//! world resolves them through its own tables. Ids are allocated
//! monotonically by the world and are never reused after a clear, so a stale
//! reference can be detected instead of aliasing a new entity.

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Null/invalid id.
            pub const NULL: Self = Self(0);

            /// Creates an id from a raw value.
            #[must_use]
            pub const fn from_raw(value: u32) -> Self {
                Self(value)
            }

            /// Returns the raw id value.
            #[must_use]
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Checks if this is a valid (non-null) id.
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }
    };
}

entity_id!(
    /// Identifier of a horizontal zone.
    ZoneId
);

entity_id!(
    /// Identifier of a biome.
    BiomeId
);

entity_id!(
    /// Identifier of a structure (minibiome).
    StructureId
);
