//! Phase 3: surface shaping — terrain line, carvings, water bodies, grass,
//! trees and the surface material passes.

use noise::{NoiseFn, Perlin};
use strata_common::{Pixel, PixelSet, Polygon};
use tracing::{debug, info};

use crate::stages::biomes::OCEAN_WIDTH;
use crate::stages::{random_blob, StageOutcome, StageOutput};
use crate::world::{BiomeKind, StructureKind, World, ZoneKind};

/// Columns the chasm/lake generators keep clear of each world edge.
const EDGE_MARGIN: i32 = OCEAN_WIDTH + 50;

/// Builds the per-column terrain top line and the base surface parts.
///
/// The line comes from two octaves of Perlin noise around the lower part of
/// the surface band; `SurfacePart` structures cover the ground between
/// hill/hole footprints, which later stages reshape.
pub(crate) fn define_surface(world: &World) -> StageOutcome {
    let mut rng = world.rng("define_surface");
    let width = world.width();
    let Some(surface) = world.zone_rect(ZoneKind::Surface) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };

    let coarse = Perlin::new(rng.u32(..));
    let detail = Perlin::new(rng.u32(..));
    let base = surface.y + surface.h * 5 / 8;
    let amplitude = f64::from(surface.h) / 4.0;

    let mut line = vec![0i32; width.max(0) as usize];
    for x in 0..width {
        if x % 256 == 0 && world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let fx = f64::from(x);
        let n = coarse.get([fx / 300.0, 0.5]) + 0.35 * detail.get([fx / 60.0, 7.3]);
        let y = base + (n * amplitude) as i32;
        line[x as usize] = y.clamp(surface.y + 8, surface.bottom() - 8);
    }

    // Base terrain between the carved footprints.
    let mut cuts: Vec<(i32, i32)> = {
        let structures = world.structures();
        structures
            .iter()
            .filter(|s| matches!(s.kind, StructureKind::Hill | StructureKind::Hole))
            .filter_map(|s| s.pixels.bbox())
            .map(|b| (b.x.max(0), b.right().min(width)))
            .collect()
    };
    cuts.sort_unstable();
    let mut segments = Vec::new();
    let mut cursor = 0;
    for (start, end) in cuts {
        if start > cursor {
            segments.push((cursor, start));
        }
        cursor = cursor.max(end);
    }
    if cursor < width {
        segments.push((cursor, width));
    }

    let mut out = StageOutput::default();
    for (start, end) in segments {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let mut part = PixelSet::new();
        for x in start..end {
            for y in line[x as usize]..surface.bottom() {
                part.add(x, y);
            }
        }
        if !part.is_empty() {
            out.structures.push((StructureKind::SurfacePart, part));
        }
    }

    debug!(parts = out.structures.len(), "surface line defined");
    out.surface_line = Some(line);
    StageOutcome::Done(out)
}

/// Raises the terrain line to each hill's profile.
pub(crate) fn generate_hills(world: &World) -> StageOutcome {
    merge_carvings(world, StructureKind::Hill)
}

/// Lowers the terrain line into each hole's profile.
pub(crate) fn generate_holes(world: &World) -> StageOutcome {
    merge_carvings(world, StructureKind::Hole)
}

fn merge_carvings(world: &World, kind: StructureKind) -> StageOutcome {
    let mut line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let structures = world.structures();
    for s in structures.iter().filter(|s| s.kind == kind) {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let mut tops: rustc_hash::FxHashMap<i32, i32> = rustc_hash::FxHashMap::default();
        for p in s.pixels.iter() {
            tops.entry(p.x)
                .and_modify(|top| *top = (*top).min(p.y))
                .or_insert(p.y);
        }
        for (x, top) in tops {
            if x < 0 || x as usize >= line.len() {
                continue;
            }
            let current = line[x as usize];
            line[x as usize] = match kind {
                StructureKind::Hill => current.min(top),
                _ => current.max(top),
            };
        }
    }

    let mut out = StageOutput::default();
    out.surface_line = Some(line);
    StageOutcome::Done(out)
}

/// Fills steep steps in the terrain line with transition material.
pub(crate) fn generate_cliffs_transitions(world: &World) -> StageOutcome {
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let mut out = StageOutput::default();
    let mut face = PixelSet::new();
    let mut last_cliff_x = i32::MIN;
    for x in 1..line.len() as i32 {
        if x % 256 == 0 && world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let a = line[(x - 1) as usize];
        let b = line[x as usize];
        if (a - b).abs() > 3 {
            if last_cliff_x + 1 < x && !face.is_empty() {
                out.structures
                    .push((StructureKind::TransitionMaterial, std::mem::take(&mut face)));
            }
            for y in a.min(b)..a.max(b) {
                face.add(x, y);
            }
            last_cliff_x = x;
        }
    }
    if !face.is_empty() {
        out.structures
            .push((StructureKind::TransitionMaterial, face));
    }
    StageOutcome::Done(out)
}

/// Carves the left ocean basin.
pub(crate) fn generate_ocean_left(world: &World) -> StageOutcome {
    generate_ocean(world, true)
}

/// Carves the right ocean basin.
pub(crate) fn generate_ocean_right(world: &World) -> StageOutcome {
    generate_ocean(world, false)
}

/// Sloped basin in the ocean band: water from sea level down to the floor,
/// a sand lining under it, and the terrain line dropped to the floor.
fn generate_ocean(world: &World, left: bool) -> StageOutcome {
    let width = world.width();
    let Some(surface) = world.zone_rect(ZoneKind::Surface) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    let mut line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let ocean_w = OCEAN_WIDTH.min(width);
    let sea_level = surface.y + surface.h / 2;
    let max_depth = (surface.h / 2 - 10).max(4);

    let mut water = PixelSet::new();
    let mut sand = PixelSet::new();
    for i in 0..ocean_w {
        if i % 64 == 0 && world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let x = if left { i } else { width - 1 - i };
        // Deepest at the world edge, shoaling toward the shore.
        let depth = (f64::from(ocean_w - i) / f64::from(ocean_w) * f64::from(max_depth)) as i32;
        let floor = sea_level + depth;
        for y in sea_level..floor {
            water.add(x, y);
        }
        for y in floor..(floor + 3).min(surface.bottom()) {
            sand.add(x, y);
        }
        line[x as usize] = floor;
    }

    let mut out = StageOutput::default();
    out.structures.push((StructureKind::Water, water));
    out.structures.push((StructureKind::Sand, sand));
    out.surface_line = Some(line);
    StageOutcome::Done(out)
}

/// Cuts a few narrow shafts from the surface into the underground band.
pub(crate) fn generate_chasms(world: &World) -> StageOutcome {
    let mut rng = world.rng("generate_chasms");
    let width = world.width();
    let Some(underground) = world.zone_rect(ZoneKind::Underground) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }
    if width <= 2 * EDGE_MARGIN {
        return StageOutcome::Done(StageOutput::default());
    }

    let mut out = StageOutput::default();
    let count = 2 + rng.usize(0..3);
    let bottom = underground.y + underground.h / 2;
    for _ in 0..count {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let cx = rng.i32(EDGE_MARGIN..width - EDGE_MARGIN);
        let half = (8 + rng.i32(0..9)) / 2;
        let mut shaft = PixelSet::new();
        for x in (cx - half).max(0)..(cx + half).min(width) {
            for y in line[x as usize]..bottom {
                shaft.add(x, y);
            }
        }
        out.structures.push((StructureKind::Cave, shaft));
    }
    info!(count, "chasms carved");
    StageOutcome::Done(out)
}

/// Scatters shallow polygonal lakes across the surface.
pub(crate) fn generate_lakes(world: &World) -> StageOutcome {
    let mut rng = world.rng("generate_lakes");
    let width = world.width();
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }
    if width <= 2 * EDGE_MARGIN {
        return StageOutcome::Done(StageOutput::default());
    }

    let mut out = StageOutput::default();
    let count = 2 + rng.usize(0..2);
    for _ in 0..count {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let cx = rng.i32(EDGE_MARGIN..width - EDGE_MARGIN);
        let cy = line[cx as usize];
        let rx = f64::from(30 + rng.i32(0..30));
        let ry = f64::from(8 + rng.i32(0..8));

        // Jittered ellipse outline; the crossing-number rasterizer fills it.
        let vertices: Vec<Pixel> = (0..12)
            .map(|k| {
                let angle = f64::from(k) / 12.0 * std::f64::consts::TAU;
                let jitter = 0.8 + 0.4 * rng.f64();
                Pixel::new(
                    cx + (rx * angle.cos() * jitter) as i32,
                    cy + (ry * angle.sin() * jitter) as i32,
                )
            })
            .collect();
        let lake = Polygon::new(vertices).rasterize();
        if !lake.is_empty() {
            out.structures.push((StructureKind::Water, lake));
        }
    }
    StageOutcome::Done(out)
}

/// Floods the jungle strip's surface with swamp water.
pub(crate) fn generate_jungle_swamp(world: &World) -> StageOutcome {
    let width = world.width();
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let biomes = world.biomes();
    let Some(jungle) = biomes.iter().find(|b| b.kind == BiomeKind::Jungle) else {
        return StageOutcome::Done(StageOutput::default());
    };

    let mut swamp = PixelSet::new();
    for x in 0..width {
        if x % 256 == 0 && world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let top = line[x as usize];
        if jungle.pixels.contains(Pixel::new(x, top)) {
            for y in top..top + 4 {
                swamp.add(x, y);
            }
        }
    }

    let mut out = StageOutput::default();
    if !swamp.is_empty() {
        out.structures.push((StructureKind::Water, swamp));
    }
    StageOutcome::Done(out)
}

/// Lines the terrain top with grass outside oceans and water.
pub(crate) fn generate_grass(world: &World) -> StageOutcome {
    let width = world.width();
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let mut grass = PixelSet::new();
    for x in 0..width {
        if x % 256 == 0 && world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let top = line[x as usize];
        let Some(meta) = world.meta_at(x, top) else {
            continue;
        };
        if matches!(
            world.biome_kind(meta.biome),
            Some(BiomeKind::OceanLeft | BiomeKind::OceanRight)
        ) {
            continue;
        }
        if matches!(
            world.structure_kind(meta.structure),
            Some(StructureKind::Water | StructureKind::Sand)
        ) {
            continue;
        }
        grass.add(x, top);
    }

    let mut out = StageOutput::default();
    out.structures.push((StructureKind::GrassSurface, grass));
    StageOutcome::Done(out)
}

/// Plants trees on grassed columns at random spacing.
pub(crate) fn generate_trees(world: &World) -> StageOutcome {
    let mut rng = world.rng("generate_trees");
    let width = world.width();
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let mut out = StageOutput::default();
    let mut x = 5;
    while x < width - 5 {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let top = line[x as usize];
        let grassy = world
            .meta_at(x, top)
            .map(|m| world.structure_kind(m.structure) == Some(StructureKind::GrassSurface))
            .unwrap_or(false);
        if !grassy {
            x += 5;
            continue;
        }

        let trunk_h = 6 + rng.i32(0..9);
        let canopy_r = 2 + rng.i32(0..3);
        let mut tree = PixelSet::new();
        for k in 1..=trunk_h {
            tree.add(x, top - k);
        }
        let crown_y = top - trunk_h - 1;
        for dy in -canopy_r..=canopy_r {
            for dx in -canopy_r..=canopy_r {
                if dx * dx + dy * dy <= canopy_r * canopy_r {
                    tree.add(x + dx, crown_y + dy);
                }
            }
        }
        out.structures.push((StructureKind::Tree, tree));
        x += 15 + rng.i32(0..20);
    }

    info!(trees = out.structures.len(), "trees planted");
    StageOutcome::Done(out)
}

/// Lines the top of each floating island with grass.
pub(crate) fn generate_islands(world: &World) -> StageOutcome {
    let structures = world.structures();
    let mut out = StageOutput::default();
    for island in structures
        .iter()
        .filter(|s| s.kind == StructureKind::FloatingIsland)
    {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let mut tops: rustc_hash::FxHashMap<i32, i32> = rustc_hash::FxHashMap::default();
        for p in island.pixels.iter() {
            tops.entry(p.x)
                .and_modify(|top| *top = (*top).min(p.y))
                .or_insert(p.y);
        }
        let mut lining = PixelSet::new();
        for (x, top) in tops {
            lining.add(x, top - 1);
        }
        if !lining.is_empty() {
            out.structures.push((StructureKind::GrassSurface, lining));
        }
    }
    StageOutcome::Done(out)
}

/// Scatters sand near the shores and transition blobs through the surface
/// ground.
pub(crate) fn generate_surface_materials(world: &World) -> StageOutcome {
    let mut rng = world.rng("generate_surface_materials");
    let width = world.width();
    let Some(surface) = world.zone_rect(ZoneKind::Surface) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let mut out = StageOutput::default();
    for _ in 0..20 {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let cx = rng.i32(0..width);
        let top = line[cx as usize];
        if top + 1 >= surface.bottom() {
            continue;
        }
        let cy = rng.i32(top..surface.bottom());
        let target = 30 + rng.usize(0..50);
        let blob = random_blob(&mut rng, cx, cy, target, surface);
        let kind = if cx < EDGE_MARGIN || cx >= width - EDGE_MARGIN {
            StructureKind::Sand
        } else {
            StructureKind::TransitionMaterial
        };
        out.structures.push((kind, blob));
    }
    StageOutcome::Done(out)
}

/// Copper and iron deposits in the surface ground.
pub(crate) fn generate_surface_ores(world: &World) -> StageOutcome {
    let mut rng = world.rng("generate_surface_ores");
    let cfg = world.config();
    let width = world.width();
    let Some(surface) = world.zone_rect(ZoneKind::Surface) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    let line = world.surface_line().clone();
    if line.is_empty() {
        return StageOutcome::Failed("SURFACE LINE NOT DEFINED".to_owned());
    }

    let mut out = StageOutput::default();
    for setting in [cfg.ores.copper, cfg.ores.iron] {
        let count = (setting.frequency * 20.0) as usize;
        let target = 4 + (setting.size * 12.0) as usize;
        for _ in 0..count {
            if world.should_force_stop() {
                return StageOutcome::Cancelled;
            }
            let cx = rng.i32(0..width);
            let top = line[cx as usize];
            if top + 1 >= surface.bottom() {
                continue;
            }
            let cy = rng.i32(top..surface.bottom());
            let blob = random_blob(&mut rng, cx, cy, target, surface);
            out.structures.push((StructureKind::Ore, blob));
        }
    }
    info!(deposits = out.structures.len(), "surface ores placed");
    StageOutcome::Done(out)
}
