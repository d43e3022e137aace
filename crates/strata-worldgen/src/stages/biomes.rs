//! Phase 1: oceans, the jungle and tundra strips, and the forest remainder.

use strata_common::{Pixel, PixelSet, Rect};
use strata_csp::{Constraint, Outcome, Solver};
use tracing::{debug, info};

use crate::stages::{flood_fill, StageOutcome, StageOutput};
use crate::world::{BiomeKind, World, ZoneKind};

pub(crate) const OCEAN_WIDTH: i32 = 250;
const STRIP_WIDTH: i32 = 500;
const STRIP_STEP: i32 = 50;

/// Lays out the biomes of the surface-to-hell band.
///
/// Publication order is oceans, jungle, tundra, forests, and a later biome
/// never claims a pixel an earlier one owns, so the band stays an exact
/// partition. Both strips slant rightward by one column per row; anchors at
/// least `STRIP_WIDTH` apart therefore stay disjoint all the way down.
pub(crate) fn define_biomes(world: &World) -> StageOutcome {
    let width = world.width();
    let (Some(surface), Some(hell)) = (
        world.zone_rect(ZoneKind::Surface),
        world.zone_rect(ZoneKind::Hell),
    ) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };

    let mut out = StageOutput::default();
    let mut claimed = PixelSet::new();

    // Oceans span the surface band at both world edges.
    let ocean_w = OCEAN_WIDTH.min(width);
    let mut ocean_left = PixelSet::new();
    ocean_left.fill_rect(Rect::new(0, surface.y, ocean_w, surface.h));
    let ocean_left = claim(ocean_left, &mut claimed);
    out.biomes.push((BiomeKind::OceanLeft, ocean_left));

    let mut ocean_right = PixelSet::new();
    ocean_right.fill_rect(Rect::new((width - ocean_w).max(0), surface.y, ocean_w, surface.h));
    let ocean_right = claim(ocean_right, &mut claimed);
    out.biomes.push((BiomeKind::OceanRight, ocean_right));

    // Anchor columns for the two strips come from a two-variable CSP with a
    // single pairwise distance constraint.
    let domain: Vec<i32> = {
        let start = OCEAN_WIDTH + 50;
        let end = width - 2 * OCEAN_WIDTH - 50;
        (start..=end).step_by(STRIP_STEP as usize).collect()
    };
    let mut solver = Solver::new();
    let jungle_var = solver.add_variable(domain.clone());
    let tundra_var = solver.add_variable(domain);
    solver.add_constraint(Constraint::Distance {
        a: jungle_var,
        b: tundra_var,
        min: STRIP_WIDTH,
    });

    let values = match solver.solve(&|| world.should_force_stop()) {
        Outcome::Solution(values) => values,
        Outcome::Cancelled => return StageOutcome::Cancelled,
        Outcome::Unsatisfiable => {
            return StageOutcome::Failed("COULD NOT FIND SOLUTION FOR BIOME PLACEMENT".to_owned())
        }
    };
    let jungle_x = values[jungle_var.index()];
    let tundra_x = values[tundra_var.index()];
    debug!(jungle_x, tundra_x, "strip anchors placed");

    for (kind, anchor) in [(BiomeKind::Jungle, jungle_x), (BiomeKind::Tundra, tundra_x)] {
        let mut strip = PixelSet::new();
        for y in surface.y..hell.y {
            if (y - surface.y) % 64 == 0 && world.should_force_stop() {
                return StageOutcome::Cancelled;
            }
            // Two-pixel-thick band per row, slanting with depth.
            let center = anchor + (y - surface.y);
            let x0 = (center - STRIP_WIDTH / 2).max(0);
            let x1 = (center + STRIP_WIDTH / 2).min(width);
            for x in x0..x1 {
                strip.add(x, y);
                if y + 1 < hell.y {
                    strip.add(x, y + 1);
                }
            }
        }
        let strip = claim(strip, &mut claimed);
        out.biomes.push((kind, strip));
    }

    // Forests are the 4-connected components of whatever is left.
    let band = Rect::new(0, surface.y, width, hell.y - surface.y);
    let mut remaining = PixelSet::with_capacity(band.area().max(0) as usize);
    remaining.fill_rect(band);
    remaining.subtract(&claimed);

    let mut forest_count = 0;
    for y in band.y..band.bottom() {
        if (y - band.y) % 64 == 0 && world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        for x in band.x..band.right() {
            let start = Pixel::new(x, y);
            if !remaining.contains(start) {
                continue;
            }
            let forest = flood_fill(&mut remaining, start);
            out.biomes.push((BiomeKind::Forest, forest));
            forest_count += 1;
        }
    }

    info!(jungle_x, tundra_x, forest_count, "biomes defined");
    StageOutcome::Done(out)
}

/// Removes already-claimed pixels from `pixels`, then claims the rest.
fn claim(mut pixels: PixelSet, claimed: &mut PixelSet) -> PixelSet {
    pixels.subtract(claimed);
    claimed.union_with(&pixels);
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testutil::with_biomes;

    #[test]
    fn reference_world_biome_layout() {
        let world = with_biomes(4200, 1200);
        let biomes = world.biomes();
        let kinds: Vec<BiomeKind> = biomes.iter().take(4).map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            [
                BiomeKind::OceanLeft,
                BiomeKind::OceanRight,
                BiomeKind::Jungle,
                BiomeKind::Tundra,
            ]
        );
        assert_eq!(biomes[0].pixels.bbox(), Some(Rect::new(0, 120, 250, 240)));
        assert_eq!(biomes[1].pixels.bbox(), Some(Rect::new(3950, 120, 250, 240)));
        assert!(biomes.iter().any(|b| b.kind == BiomeKind::Forest));
    }

    #[test]
    fn strip_anchors_respect_distance() {
        let world = with_biomes(4200, 1200);
        // Compare strip edges on one underground row, away from the ocean
        // clipping in the surface band.
        let row = world
            .zone_rect(ZoneKind::Underground)
            .expect("underground")
            .y;
        let edge_at = |kind: BiomeKind| {
            let biomes = world.biomes();
            let strip = biomes.iter().find(|b| b.kind == kind).expect("strip");
            strip
                .pixels
                .iter()
                .filter(|p| p.y == row)
                .map(|p| p.x)
                .min()
                .expect("strip row")
        };
        let jx = edge_at(BiomeKind::Jungle);
        let tx = edge_at(BiomeKind::Tundra);
        assert!((jx - tx).abs() >= STRIP_WIDTH, "edges {jx} vs {tx}");
    }

    #[test]
    fn biomes_partition_the_band() {
        // Small world keeps the disjointness sweep cheap.
        let world = with_biomes(1400, 400);
        let surface = world.zone_rect(ZoneKind::Surface).expect("surface");
        let hell = world.zone_rect(ZoneKind::Hell).expect("hell");
        let band = Rect::new(0, surface.y, 1400, hell.y - surface.y);

        let biomes = world.biomes();
        let mut seen = PixelSet::new();
        let mut total = 0usize;
        for biome in biomes.iter() {
            for p in biome.pixels.iter() {
                assert!(band.contains(p), "{p:?} outside the band");
                assert!(seen.insert(p), "{p:?} claimed twice");
            }
            total += biome.pixels.len();
        }
        assert_eq!(total as i64, band.area(), "band not fully covered");
    }

    #[test]
    fn forests_are_connected_components() {
        let world = with_biomes(1400, 400);
        let biomes = world.biomes();
        for forest in biomes.iter().filter(|b| b.kind == BiomeKind::Forest) {
            // Flood from any member reaches the whole instance.
            let start = forest
                .pixels
                .iter()
                .min_by_key(|p| (p.y, p.x))
                .expect("non-empty forest");
            let mut copy = forest.pixels.clone();
            let component = flood_fill(&mut copy, start);
            assert_eq!(component.len(), forest.pixels.len());
        }
    }

    #[test]
    fn cancellation_returns_without_output() {
        let world = crate::stages::testutil::with_zones(1400, 400);
        world.set_force_stop(true);
        assert!(matches!(define_biomes(&world), StageOutcome::Cancelled));
        assert!(world.biomes().is_empty());
    }
}
