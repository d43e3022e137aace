//! Generator configuration.

use serde::{Deserialize, Serialize};
use strata_common::{GenError, GenResult};

use crate::world::Phase;

/// Frequency and blob-size sliders for one ore kind, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OreSetting {
    /// How many deposits to place, as a fraction of the per-band maximum.
    pub frequency: f32,
    /// Deposit size, as a fraction of the maximum blob size.
    pub size: f32,
}

impl Default for OreSetting {
    fn default() -> Self {
        Self {
            frequency: 0.5,
            size: 0.5,
        }
    }
}

/// Per-kind ore sliders.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OreConfig {
    /// Copper; surface and underground bands.
    pub copper: OreSetting,
    /// Iron; surface and underground bands.
    pub iron: OreSetting,
    /// Silver; cavern band.
    pub silver: OreSetting,
    /// Gold; cavern band.
    pub gold: OreSetting,
}

/// Full generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenConfig {
    /// World width in cells.
    pub width: i32,
    /// World height in cells.
    pub height: i32,
    /// Seed for all stage RNG sub-streams.
    pub seed: u64,
    /// Hill count slider in [0, 1]; 1.0 places 12 hills.
    pub hills_frequency: f32,
    /// Hole count slider in [0, 1]; 1.0 places 10 holes.
    pub holes_frequency: f32,
    /// Floating island count slider in [0, 1]; 1.0 places 8 islands.
    pub islands_frequency: f32,
    /// Cabin count slider in [0, 1]; 1.0 places 60 cabins.
    pub cabins_frequency: f32,
    /// Ore sliders.
    pub ores: OreConfig,
    /// Dispatch cave carving right after the horizontal zones are known,
    /// concurrently with the biome and placement phases.
    pub early_caves: bool,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            width: 4200,
            height: 1200,
            seed: 0,
            hills_frequency: 0.25,
            holes_frequency: 0.25,
            islands_frequency: 0.25,
            cabins_frequency: 0.25,
            ores: OreConfig::default(),
            early_caves: false,
        }
    }
}

impl GenConfig {
    /// Validates dimensions and slider ranges.
    pub fn validate(&self) -> GenResult<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(GenError::ConfigInvalid(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        let sliders = [
            ("hills_frequency", self.hills_frequency),
            ("holes_frequency", self.holes_frequency),
            ("islands_frequency", self.islands_frequency),
            ("cabins_frequency", self.cabins_frequency),
            ("ores.copper.frequency", self.ores.copper.frequency),
            ("ores.copper.size", self.ores.copper.size),
            ("ores.iron.frequency", self.ores.iron.frequency),
            ("ores.iron.size", self.ores.iron.size),
            ("ores.silver.frequency", self.ores.silver.frequency),
            ("ores.silver.size", self.ores.silver.size),
            ("ores.gold.frequency", self.ores.gold.frequency),
            ("ores.gold.size", self.ores.gold.size),
        ];
        for (name, value) in sliders {
            if !(0.0..=1.0).contains(&value) {
                return Err(GenError::ConfigInvalid(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// The earliest phase whose output changes when switching from `self`
    /// to `next`.
    ///
    /// An unchanged config reruns everything: regenerate is an explicit
    /// request, and per-stage seeding makes a partial rerun a no-op.
    #[must_use]
    pub fn min_affected_phase(&self, next: &GenConfig) -> Phase {
        if self == next {
            return Phase::Horizontal;
        }
        if self.width != next.width || self.height != next.height || self.seed != next.seed {
            return Phase::Horizontal;
        }
        if self.hills_frequency != next.hills_frequency
            || self.holes_frequency != next.holes_frequency
            || self.islands_frequency != next.islands_frequency
            || self.cabins_frequency != next.cabins_frequency
        {
            return Phase::Placement;
        }
        if self.ores != next.ores {
            return Phase::Surface;
        }
        // Only early_caves toggled: caves live in the underground phase.
        Phase::Underground
    }
}
