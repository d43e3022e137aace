//! # Strata Worldgen
//!
//! Procedural generation of a large layered 2D raster world: horizontal
//! zones, regional biomes, and discrete minibiomes (hills, holes, floating
//! islands, cabins, castles, caves) placed by a constraint solver.
//!
//! The crate is renderer-agnostic. A [`pipeline::Generator`] runs the stage
//! pipeline against a [`world::World`]; any front end reads the generated
//! state through the world's snapshot getters and per-cell metadata.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod pipeline;
pub mod spline;
pub mod stages;
pub mod world;

pub use config::{GenConfig, OreConfig, OreSetting};
pub use pipeline::{Generator, RunStatus, StageState};
pub use world::{
    Biome, BiomeKind, CellMeta, Phase, Structure, StructureKind, World, Zone, ZoneKind,
};
