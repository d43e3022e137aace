//! The stage library and its fixed dispatch table.
//!
//! Each stage is a value carrying its name, phase, messages, write-set,
//! optional wall-clock budget, criticality and run function; the pipeline
//! iterates this table rather than a trait hierarchy. Stage bodies are pure
//! functions of the world and their RNG sub-stream: they read published
//! state and return a [`StageOutput`] which the pipeline publishes in table
//! order, so concurrently-running stages cannot interleave their writes.

use std::collections::VecDeque;
use std::time::Duration;

use strata_common::{Pixel, PixelSet, Rect};

use crate::world::{BiomeKind, Phase, StructureKind, World, ZoneKind};

pub mod biomes;
pub mod horizontal;
pub mod placement;
pub mod surface;
pub mod underground;

/// Everything a stage produced; published by the pipeline on completion.
#[derive(Debug, Default)]
pub struct StageOutput {
    /// New zones, in order.
    pub zones: Vec<(ZoneKind, Rect, PixelSet)>,
    /// New biomes, in order.
    pub biomes: Vec<(BiomeKind, PixelSet)>,
    /// New structures, in order.
    pub structures: Vec<(StructureKind, PixelSet)>,
    /// Replacement terrain top line, if the stage reshaped it.
    pub surface_line: Option<Vec<i32>>,
}

/// Terminal state of one stage run.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage finished; its output is ready to publish.
    Done(StageOutput),
    /// The stage observed the force-stop flag and returned early.
    Cancelled,
    /// The stage failed; the message is user-visible.
    Failed(String),
}

/// Wall-clock budget for a stage dispatched on a worker thread.
#[derive(Debug, Clone, Copy)]
pub struct StageBudget {
    /// Budget before the pipeline declares the stage overdue.
    pub limit: Duration,
    /// User-visible message recorded on budget overrun.
    pub error: &'static str,
}

/// One entry of the stage table.
pub struct StageDef {
    /// Stage name; also seeds the stage's RNG sub-stream.
    pub name: &'static str,
    /// Owning phase.
    pub phase: Phase,
    /// Progress message shown while the stage runs.
    pub progress: &'static str,
    /// Collections the stage writes; stages scheduled concurrently within a
    /// phase must have disjoint write-sets.
    pub writes: &'static [&'static str],
    /// Present for stages dispatched on a worker thread with a deadline.
    pub budget: Option<StageBudget>,
    /// A failure here skips all subsequent phases.
    pub critical: bool,
    /// The stage body.
    pub run: fn(&World) -> StageOutcome,
}

const PLACEMENT_BUDGET: Duration = Duration::from_secs(5);
const TREES_BUDGET: Duration = Duration::from_secs(2);
const CAVES_BUDGET: Duration = Duration::from_secs(5);

/// The fixed stage table, in execution order within each phase.
pub static STAGES: &[StageDef] = &[
    StageDef {
        name: "define_horizontal",
        phase: Phase::Horizontal,
        progress: "DEFINITION OF HORIZONTAL AREAS...",
        writes: &["zones"],
        budget: None,
        critical: true,
        run: horizontal::define_horizontal,
    },
    StageDef {
        name: "define_biomes",
        phase: Phase::Biomes,
        progress: "DEFINITION OF BIOMES...",
        writes: &["biomes"],
        budget: None,
        critical: false,
        run: biomes::define_biomes,
    },
    StageDef {
        name: "define_hills_holes_islands",
        phase: Phase::Placement,
        progress: "DEFINITION OF HILLS, HOLES, ISLANDS...",
        writes: &["structures:Hill", "structures:Hole", "structures:FloatingIsland"],
        budget: Some(StageBudget {
            limit: PLACEMENT_BUDGET,
            error: "DEFINITION OF HILLS, HOLES, ISLANDS INFEASIBLE",
        }),
        critical: true,
        run: placement::define_hills_holes_islands,
    },
    StageDef {
        name: "define_cabins",
        phase: Phase::Placement,
        progress: "DEFINITION OF UNDERGROUND CABINS...",
        writes: &["structures:Cabin"],
        budget: Some(StageBudget {
            limit: PLACEMENT_BUDGET,
            error: "DEFINITION OF UNDERGROUND CABINS INFEASIBLE",
        }),
        critical: false,
        run: placement::define_cabins,
    },
    StageDef {
        name: "define_castles",
        phase: Phase::Placement,
        progress: "DEFINITION OF UNDERGROUND CASTLES...",
        writes: &["structures:Castle"],
        budget: Some(StageBudget {
            limit: PLACEMENT_BUDGET,
            error: "DEFINITION OF UNDERGROUND CASTLES INFEASIBLE",
        }),
        critical: false,
        run: placement::define_castles,
    },
    StageDef {
        name: "define_surface",
        phase: Phase::Surface,
        progress: "DEFINITION OF SURFACE...",
        writes: &["structures:SurfacePart", "surface_line"],
        budget: None,
        critical: false,
        run: surface::define_surface,
    },
    StageDef {
        name: "generate_hills",
        phase: Phase::Surface,
        progress: "GENERATION OF HILLS...",
        writes: &["surface_line"],
        budget: None,
        critical: false,
        run: surface::generate_hills,
    },
    StageDef {
        name: "generate_holes",
        phase: Phase::Surface,
        progress: "GENERATION OF HOLES...",
        writes: &["surface_line"],
        budget: None,
        critical: false,
        run: surface::generate_holes,
    },
    StageDef {
        name: "generate_cliffs_transitions",
        phase: Phase::Surface,
        progress: "GENERATION OF CLIFFS AND TRANSITIONS...",
        writes: &["structures:TransitionMaterial"],
        budget: None,
        critical: false,
        run: surface::generate_cliffs_transitions,
    },
    StageDef {
        name: "generate_ocean_left",
        phase: Phase::Surface,
        progress: "GENERATION OF LEFT OCEAN...",
        writes: &["structures:Water", "structures:Sand", "surface_line"],
        budget: None,
        critical: false,
        run: surface::generate_ocean_left,
    },
    StageDef {
        name: "generate_ocean_right",
        phase: Phase::Surface,
        progress: "GENERATION OF RIGHT OCEAN...",
        writes: &["structures:Water", "structures:Sand", "surface_line"],
        budget: None,
        critical: false,
        run: surface::generate_ocean_right,
    },
    StageDef {
        name: "generate_chasms",
        phase: Phase::Surface,
        progress: "GENERATION OF CHASMS...",
        writes: &["structures:Cave"],
        budget: None,
        critical: false,
        run: surface::generate_chasms,
    },
    StageDef {
        name: "generate_lakes",
        phase: Phase::Surface,
        progress: "GENERATION OF LAKES...",
        writes: &["structures:Water"],
        budget: None,
        critical: false,
        run: surface::generate_lakes,
    },
    StageDef {
        name: "generate_jungle_swamp",
        phase: Phase::Surface,
        progress: "GENERATION OF JUNGLE SWAMP...",
        writes: &["structures:Water"],
        budget: None,
        critical: false,
        run: surface::generate_jungle_swamp,
    },
    StageDef {
        name: "generate_grass",
        phase: Phase::Surface,
        progress: "GENERATION OF GRASS...",
        writes: &["structures:GrassSurface"],
        budget: None,
        critical: false,
        run: surface::generate_grass,
    },
    StageDef {
        name: "generate_trees",
        phase: Phase::Surface,
        progress: "GENERATION OF TREES...",
        writes: &["structures:Tree"],
        budget: Some(StageBudget {
            limit: TREES_BUDGET,
            error: "DEFINITION OF TREES INFEASIBLE",
        }),
        critical: false,
        run: surface::generate_trees,
    },
    StageDef {
        name: "generate_islands",
        phase: Phase::Surface,
        progress: "GENERATION OF ISLANDS...",
        writes: &["structures:GrassSurface"],
        budget: None,
        critical: false,
        run: surface::generate_islands,
    },
    StageDef {
        name: "generate_surface_materials",
        phase: Phase::Surface,
        progress: "GENERATION OF SURFACE MATERIALS...",
        writes: &["structures:Sand", "structures:TransitionMaterial"],
        budget: None,
        critical: false,
        run: surface::generate_surface_materials,
    },
    StageDef {
        name: "generate_surface_ores",
        phase: Phase::Surface,
        progress: "GENERATION OF SURFACE ORES...",
        writes: &["structures:Ore"],
        budget: None,
        critical: false,
        run: surface::generate_surface_ores,
    },
    StageDef {
        name: "generate_caves",
        phase: Phase::Underground,
        progress: "GENERATION OF CAVES...",
        writes: &["structures:Cave"],
        budget: Some(StageBudget {
            limit: CAVES_BUDGET,
            error: "GENERATION OF CAVES INFEASIBLE...",
        }),
        critical: false,
        run: underground::generate_caves,
    },
    StageDef {
        name: "generate_underground_materials",
        phase: Phase::Underground,
        progress: "GENERATION OF UNDERGROUND MATERIALS...",
        writes: &["structures:TransitionMaterial"],
        budget: None,
        critical: false,
        run: underground::generate_underground_materials,
    },
    StageDef {
        name: "generate_underground_ores",
        phase: Phase::Underground,
        progress: "GENERATION OF UNDERGROUND ORES...",
        writes: &["structures:Ore"],
        budget: None,
        critical: false,
        run: underground::generate_underground_ores,
    },
    StageDef {
        name: "generate_cavern_materials",
        phase: Phase::Underground,
        progress: "GENERATION OF CAVERN MATERIALS...",
        writes: &["structures:TransitionMaterial"],
        budget: None,
        critical: false,
        run: underground::generate_cavern_materials,
    },
    StageDef {
        name: "generate_cavern_ores",
        phase: Phase::Underground,
        progress: "GENERATION OF CAVERN ORES...",
        writes: &["structures:Ore"],
        budget: None,
        critical: false,
        run: underground::generate_cavern_ores,
    },
    StageDef {
        name: "generate_cave_lakes",
        phase: Phase::Underground,
        progress: "GENERATION OF CAVE LAKES...",
        writes: &["structures:Water"],
        budget: None,
        critical: false,
        run: underground::generate_cave_lakes,
    },
];

/// Index of a stage by name.
#[must_use]
pub fn stage_index(name: &str) -> Option<usize> {
    STAGES.iter().position(|def| def.name == name)
}

// --- helpers shared by stage bodies ---------------------------------------

/// Splits `set` into 4-connected components, discovered in row-major order
/// over the set's bbox. Components smaller than `min_size` are dropped.
/// Returns `None` if `cancel` fires mid-scan.
pub(crate) fn connected_components(
    set: &PixelSet,
    min_size: usize,
    cancel: &dyn Fn() -> bool,
) -> Option<Vec<PixelSet>> {
    let mut remaining = set.clone();
    let mut components = Vec::new();
    let Some(bbox) = set.bbox() else {
        return Some(components);
    };
    for y in bbox.y..bbox.bottom() {
        if cancel() {
            return None;
        }
        for x in bbox.x..bbox.right() {
            let start = Pixel::new(x, y);
            if !remaining.contains(start) {
                continue;
            }
            let component = flood_fill(&mut remaining, start);
            if component.len() >= min_size {
                components.push(component);
            }
        }
    }
    Some(components)
}

/// Removes and returns the 4-connected component of `start` from `remaining`.
pub(crate) fn flood_fill(remaining: &mut PixelSet, start: Pixel) -> PixelSet {
    let mut component = PixelSet::new();
    let mut queue = VecDeque::new();
    remaining.remove(start);
    component.insert(start);
    queue.push_back(start);
    while let Some(p) = queue.pop_front() {
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let next = Pixel::new(p.x + dx, p.y + dy);
            if remaining.remove(next) {
                component.insert(next);
                queue.push_back(next);
            }
        }
    }
    component
}

/// Grows a blob of roughly `target` pixels by random walk from (cx, cy),
/// clipped to `bounds`. Each step stamps a 2×2 block so deposits read as
/// chunks rather than threads.
pub(crate) fn random_blob(
    rng: &mut fastrand::Rng,
    cx: i32,
    cy: i32,
    target: usize,
    bounds: Rect,
) -> PixelSet {
    let mut blob = PixelSet::new();
    let (mut x, mut y) = (cx, cy);
    let mut steps = 0;
    while blob.len() < target && steps < target * 8 {
        steps += 1;
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let p = Pixel::new(x + dx, y + dy);
            if bounds.contains(p) {
                blob.insert(p);
            }
        }
        match rng.u8(0..4) {
            0 => x += 1,
            1 => x -= 1,
            2 => y += 1,
            _ => y -= 1,
        }
        x = x.clamp(bounds.x, bounds.right() - 1);
        y = y.clamp(bounds.y, bounds.bottom() - 1);
    }
    blob
}

/// Pixels of an ellipse with the given center and semi-axes.
pub(crate) fn ellipse(cx: i32, cy: i32, rx: i32, ry: i32) -> PixelSet {
    let mut set = PixelSet::new();
    for y in (cy - ry)..=(cy + ry) {
        for x in (cx - rx)..=(cx + rx) {
            let dx = f64::from(x - cx) / f64::from(rx);
            let dy = f64::from(y - cy) / f64::from(ry);
            if dx * dx + dy * dy <= 1.0 {
                set.add(x, y);
            }
        }
    }
    set
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_phases_are_ordered() {
        let mut last = Phase::Horizontal;
        for def in STAGES {
            assert!(def.phase >= last, "stage {} out of phase order", def.name);
            last = def.phase;
        }
    }

    #[test]
    fn stage_names_are_unique() {
        for (i, def) in STAGES.iter().enumerate() {
            assert_eq!(stage_index(def.name), Some(i));
        }
    }

    #[test]
    fn concurrent_placement_write_sets_are_disjoint() {
        let placement: Vec<_> = STAGES
            .iter()
            .filter(|d| d.phase == Phase::Placement)
            .collect();
        for (i, a) in placement.iter().enumerate() {
            for b in placement.iter().skip(i + 1) {
                for w in a.writes {
                    assert!(!b.writes.contains(w), "{} and {} share {w}", a.name, b.name);
                }
            }
        }
    }

    #[test]
    fn components_split_and_filter() {
        let mut set = PixelSet::new();
        set.fill_rect(Rect::new(0, 0, 3, 3));
        set.fill_rect(Rect::new(10, 0, 2, 2));
        set.add(20, 20);
        let comps = connected_components(&set, 2, &|| false).expect("not cancelled");
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].len(), 9);
        assert_eq!(comps[1].len(), 4);
    }

    #[test]
    fn components_cancel_returns_none() {
        let mut set = PixelSet::new();
        set.fill_rect(Rect::new(0, 0, 4, 4));
        assert!(connected_components(&set, 1, &|| true).is_none());
    }

    #[test]
    fn blob_stays_in_bounds_and_reaches_target() {
        let mut rng = fastrand::Rng::with_seed(7);
        let bounds = Rect::new(0, 0, 40, 40);
        let blob = random_blob(&mut rng, 20, 20, 30, bounds);
        assert!(blob.len() >= 30);
        assert!(blob.iter().all(|p| bounds.contains(p)));
    }

    #[test]
    fn ellipse_is_symmetric_and_bounded() {
        let e = ellipse(0, 0, 10, 5);
        assert!(e.contains(Pixel::new(0, 0)));
        assert!(e.contains(Pixel::new(10, 0)));
        assert!(e.contains(Pixel::new(0, 5)));
        assert!(!e.contains(Pixel::new(10, 5)));
        assert_eq!(e.bbox(), Some(Rect::new(-10, -5, 21, 11)));
    }
}
