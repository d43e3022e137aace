//! Phase 4: caves, the underground material passes, and cave lakes.

use noise::{NoiseFn, Perlin};
use strata_common::{PixelSet, Rect};
use tracing::{debug, info};

use crate::config::OreSetting;
use crate::stages::{connected_components, random_blob, StageOutcome, StageOutput};
use crate::world::{StructureKind, World, ZoneKind};

const CAVE_THRESHOLD: f64 = 0.4;
const CAVE_MIN_SIZE: usize = 30;

/// Carves caves through the underground and cavern bands.
///
/// Two octaves of Perlin noise are thresholded into a carved mask whose
/// 4-connected components become `Cave` structures. The cancellation flag is
/// polled between rows and during the component scan.
pub(crate) fn generate_caves(world: &World) -> StageOutcome {
    let mut rng = world.rng("generate_caves");
    let width = world.width();
    let height = world.height();
    let (Some(underground), Some(cavern)) = (
        world.zone_rect(ZoneKind::Underground),
        world.zone_rect(ZoneKind::Cavern),
    ) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    let region = underground.union(cavern);

    let coarse = Perlin::new(rng.u32(..));
    let detail = Perlin::new(rng.u32(..));

    let mut carved = PixelSet::new();
    for y in region.y..region.bottom().min(height) {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        for x in 0..width {
            let fx = f64::from(x);
            let fy = f64::from(y);
            let v = coarse.get([fx / 48.0, fy / 48.0]) + 0.5 * detail.get([fx / 16.0, fy / 16.0]);
            if v > CAVE_THRESHOLD {
                carved.add(x, y);
            }
        }
    }

    let Some(components) =
        connected_components(&carved, CAVE_MIN_SIZE, &|| world.should_force_stop())
    else {
        return StageOutcome::Cancelled;
    };

    let mut out = StageOutput::default();
    for cave in components {
        out.structures.push((StructureKind::Cave, cave));
    }
    info!(caves = out.structures.len(), "caves carved");
    StageOutcome::Done(out)
}

/// Transition blobs through the underground band.
pub(crate) fn generate_underground_materials(world: &World) -> StageOutcome {
    let Some(band) = world.zone_rect(ZoneKind::Underground) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    material_blobs(world, "generate_underground_materials", band)
}

/// Transition blobs through the cavern band.
pub(crate) fn generate_cavern_materials(world: &World) -> StageOutcome {
    let Some(band) = world.zone_rect(ZoneKind::Cavern) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    material_blobs(world, "generate_cavern_materials", band)
}

fn material_blobs(world: &World, stage: &str, band: Rect) -> StageOutcome {
    let mut rng = world.rng(stage);
    let band = clip_to_world(world, band);
    if band.is_empty() {
        return StageOutcome::Done(StageOutput::default());
    }

    let mut out = StageOutput::default();
    for _ in 0..30 {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let cx = rng.i32(band.x..band.right());
        let cy = rng.i32(band.y..band.bottom());
        let target = 40 + rng.usize(0..60);
        let blob = random_blob(&mut rng, cx, cy, target, band);
        out.structures
            .push((StructureKind::TransitionMaterial, blob));
    }
    StageOutcome::Done(out)
}

/// Copper and iron deposits in the underground band.
pub(crate) fn generate_underground_ores(world: &World) -> StageOutcome {
    let cfg = world.config();
    let Some(band) = world.zone_rect(ZoneKind::Underground) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    ore_blobs(
        world,
        "generate_underground_ores",
        band,
        &[cfg.ores.copper, cfg.ores.iron],
        30,
    )
}

/// Silver and gold deposits in the cavern band.
pub(crate) fn generate_cavern_ores(world: &World) -> StageOutcome {
    let cfg = world.config();
    let Some(band) = world.zone_rect(ZoneKind::Cavern) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    ore_blobs(
        world,
        "generate_cavern_ores",
        band,
        &[cfg.ores.silver, cfg.ores.gold],
        25,
    )
}

fn ore_blobs(
    world: &World,
    stage: &str,
    band: Rect,
    settings: &[OreSetting],
    per_kind_max: usize,
) -> StageOutcome {
    let mut rng = world.rng(stage);
    let band = clip_to_world(world, band);
    if band.is_empty() {
        return StageOutcome::Done(StageOutput::default());
    }

    let mut out = StageOutput::default();
    for setting in settings {
        let count = (setting.frequency * per_kind_max as f32) as usize;
        let target = 4 + (setting.size * 16.0) as usize;
        for _ in 0..count {
            if world.should_force_stop() {
                return StageOutcome::Cancelled;
            }
            let cx = rng.i32(band.x..band.right());
            let cy = rng.i32(band.y..band.bottom());
            let blob = random_blob(&mut rng, cx, cy, target, band);
            out.structures.push((StructureKind::Ore, blob));
        }
    }
    debug!(deposits = out.structures.len(), stage, "ores placed");
    StageOutcome::Done(out)
}

/// Pools water in the bottom of each sufficiently large cave.
pub(crate) fn generate_cave_lakes(world: &World) -> StageOutcome {
    let structures = world.structures();
    let mut out = StageOutput::default();
    for cave in structures.iter().filter(|s| s.kind == StructureKind::Cave) {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        if cave.pixels.len() < 200 {
            continue;
        }
        let Some(bbox) = cave.pixels.bbox() else {
            continue;
        };
        // Flood the lowest third of the cave volume.
        let level = bbox.y + bbox.h * 7 / 10;
        let lake: PixelSet = cave.pixels.iter().filter(|p| p.y >= level).collect();
        if !lake.is_empty() {
            out.structures.push((StructureKind::Water, lake));
        }
    }
    info!(lakes = out.structures.len(), "cave lakes filled");
    StageOutcome::Done(out)
}

fn clip_to_world(world: &World, band: Rect) -> Rect {
    band.intersection(Rect::new(0, 0, world.width(), world.height()))
        .unwrap_or(Rect::new(0, 0, 0, 0))
}
