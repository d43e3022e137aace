//! Phase 2: CSP placement of hills, holes, islands, cabins and castles.

use strata_common::{PixelSet, Rect};
use strata_csp::{domain_inside_pixel_set, Constraint, Outcome, Solver, VarId};
use tracing::{debug, info};

use crate::spline::{Boundary, CubicSpline};
use crate::stages::biomes::OCEAN_WIDTH;
use crate::stages::{ellipse, StageOutcome, StageOutput};
use crate::world::{BiomeKind, StructureKind, World, ZoneKind};

const HILL_WIDTH: i32 = 80;
const HOLE_WIDTH: i32 = 60;
const ISLAND_WIDTH: i32 = 120;
const ISLAND_HEIGHT: i32 = 50;
const CABIN_WIDTH: i32 = 80;
const CABIN_HEIGHT: i32 = 40;
const CASTLE_WIDTH: i32 = 250;
const CASTLE_HEIGHT: i32 = 200;

/// Domain of anchor columns between the oceans, on a 50-column grid.
fn habitable_domain(width: i32) -> Vec<i32> {
    let start = OCEAN_WIDTH + 50;
    let end = width - OCEAN_WIDTH - 50;
    (start..=end).step_by(50).collect()
}

/// Margin added to every pairwise separation.
///
/// The jitter is biased low; full-frequency layouts must still pack into
/// the habitable span.
fn pair_margin(rng: &mut fastrand::Rng) -> i32 {
    20 + rng.i32(0..80).min(rng.i32(0..80))
}

/// Places hills, holes and floating islands along the surface band.
pub(crate) fn define_hills_holes_islands(world: &World) -> StageOutcome {
    let mut rng = world.rng("define_hills_holes_islands");
    let cfg = world.config();
    let width = world.width();
    let Some(surface) = world.zone_rect(ZoneKind::Surface) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };

    let hill_count = (12.0 * cfg.hills_frequency) as usize;
    let hole_count = (10.0 * cfg.holes_frequency) as usize;
    let island_count = (8.0 * cfg.islands_frequency) as usize;

    let domain = habitable_domain(width);
    let mut solver = Solver::new();
    let hills: Vec<VarId> = (0..hill_count)
        .map(|_| solver.add_variable(domain.clone()))
        .collect();
    let holes: Vec<VarId> = (0..hole_count)
        .map(|_| solver.add_variable(domain.clone()))
        .collect();
    let islands: Vec<VarId> = (0..island_count)
        .map(|_| solver.add_variable(domain.clone()))
        .collect();

    // Pairwise separations: within each class, plus the hole/hill and
    // hill/island cross pairs. Holes dig below ground and islands float
    // above it, so that cross pair needs no constraint.
    for &hole in &holes {
        for &hill in &hills {
            let min = pair_margin(&mut rng) + HILL_WIDTH.max(HOLE_WIDTH);
            solver.add_constraint(Constraint::Distance { a: hole, b: hill, min });
        }
    }
    between(&holes, |a, b| {
        let min = pair_margin(&mut rng) + HOLE_WIDTH;
        Constraint::Distance { a, b, min }
    })
    .into_iter()
    .for_each(|c| solver.add_constraint(c));
    between(&hills, |a, b| {
        let min = pair_margin(&mut rng) + HILL_WIDTH;
        Constraint::Distance { a, b, min }
    })
    .into_iter()
    .for_each(|c| solver.add_constraint(c));
    for &hill in &hills {
        for &island in &islands {
            let min = pair_margin(&mut rng) + HILL_WIDTH.max(ISLAND_WIDTH);
            solver.add_constraint(Constraint::Distance { a: hill, b: island, min });
        }
    }
    between(&islands, |a, b| {
        let min = pair_margin(&mut rng) + ISLAND_WIDTH;
        Constraint::Distance { a, b, min }
    })
    .into_iter()
    .for_each(|c| solver.add_constraint(c));

    let values = match solver.solve(&|| world.should_force_stop()) {
        Outcome::Solution(values) => values,
        Outcome::Cancelled => return StageOutcome::Cancelled,
        Outcome::Unsatisfiable => {
            return StageOutcome::Failed(
                "DEFINITION OF HILLS, HOLES, ISLANDS INFEASIBLE".to_owned(),
            )
        }
    };

    let mut out = StageOutput::default();
    for &var in &holes {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let x = values[var.index()];
        let rect = Rect::new(x - HOLE_WIDTH / 2, surface.y, HOLE_WIDTH, surface.h);
        out.structures
            .push((StructureKind::Hole, carve_hole(rect, &mut rng)));
    }
    for &var in &hills {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let x = values[var.index()];
        let rect = Rect::new(x - HILL_WIDTH / 2, surface.y, HILL_WIDTH, surface.h);
        out.structures
            .push((StructureKind::Hill, carve_hill(rect, &mut rng)));
    }
    for &var in &islands {
        let x = values[var.index()];
        let island = ellipse(
            x,
            surface.y + ISLAND_HEIGHT / 2,
            ISLAND_WIDTH / 2,
            ISLAND_HEIGHT / 2,
        );
        out.structures.push((StructureKind::FloatingIsland, island));
    }

    info!(
        hills = hill_count,
        holes = hole_count,
        islands = island_count,
        "hills, holes and islands placed"
    );
    StageOutcome::Done(out)
}

/// Places buried cabins inside the tundra underground.
pub(crate) fn define_cabins(world: &World) -> StageOutcome {
    let cfg = world.config();
    let count = (60.0 * cfg.cabins_frequency) as usize;
    if count == 0 {
        return StageOutcome::Done(StageOutput::default());
    }

    let (Some(underground), Some(cavern)) = (
        world.zone_rect(ZoneKind::Underground),
        world.zone_rect(ZoneKind::Cavern),
    ) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    let uc = underground.union(cavern);

    let biomes = world.biomes();
    let Some(tundra) = biomes.iter().find(|b| b.kind == BiomeKind::Tundra) else {
        return StageOutcome::Failed("COULD NOT FIND SOLUTION FOR CABIN PLACEMENT".to_owned());
    };
    let Some(rect) = tundra.pixels.bbox().and_then(|b| uc.intersection(b)) else {
        return StageOutcome::Failed("COULD NOT FIND SOLUTION FOR CABIN PLACEMENT".to_owned());
    };

    let domain = domain_inside_pixel_set(rect, &tundra.pixels, 20);
    debug!(candidates = domain.len(), count, "cabin domain built");

    let mut solver = Solver::new();
    let vars: Vec<VarId> = (0..count)
        .map(|_| solver.add_variable(domain.clone()))
        .collect();
    between(&vars, |a, b| Constraint::NonIntersection2D {
        a,
        b,
        aw: CABIN_WIDTH,
        ah: CABIN_HEIGHT,
        bw: CABIN_WIDTH,
        bh: CABIN_HEIGHT,
        stride: rect.w,
    })
    .into_iter()
    .for_each(|c| solver.add_constraint(c));
    for &var in &vars {
        solver.add_constraint(Constraint::InsidePixelSet2D {
            var,
            w: CABIN_WIDTH,
            h: CABIN_HEIGHT,
            set: &tundra.pixels,
            rect,
        });
    }

    let values = match solver.solve(&|| world.should_force_stop()) {
        Outcome::Solution(values) => values,
        Outcome::Cancelled => return StageOutcome::Cancelled,
        Outcome::Unsatisfiable => {
            return StageOutcome::Failed("COULD NOT FIND SOLUTION FOR CABIN PLACEMENT".to_owned())
        }
    };

    let mut out = StageOutput::default();
    for &var in &vars {
        let v = values[var.index()];
        let cx = rect.x + CABIN_WIDTH / 2 + v % rect.w;
        let cy = rect.y + CABIN_HEIGHT / 2 + v / rect.w;
        let mut cabin = PixelSet::new();
        cabin.fill_centered(cx, cy, CABIN_WIDTH, CABIN_HEIGHT);
        out.structures.push((StructureKind::Cabin, cabin));
    }

    info!(count, "cabins placed");
    StageOutcome::Done(out)
}

/// Places one buried castle per major biome.
pub(crate) fn define_castles(world: &World) -> StageOutcome {
    let (Some(underground), Some(cavern)) = (
        world.zone_rect(ZoneKind::Underground),
        world.zone_rect(ZoneKind::Cavern),
    ) else {
        return StageOutcome::Failed("HORIZONTAL AREAS NOT DEFINED".to_owned());
    };
    let uc = underground.union(cavern);

    let biomes = world.biomes();
    // Biomes are disjoint, so the three placements need no pairwise
    // constraints. The forest castle goes to the first forest instance.
    let mut targets = Vec::new();
    for kind in [BiomeKind::Forest, BiomeKind::Jungle, BiomeKind::Tundra] {
        let Some(biome) = biomes.iter().find(|b| b.kind == kind) else {
            return StageOutcome::Failed(
                "COULD NOT FIND SOLUTION FOR CASTLE PLACEMENT".to_owned(),
            );
        };
        let Some(rect) = biome.pixels.bbox().and_then(|b| uc.intersection(b)) else {
            return StageOutcome::Failed(
                "COULD NOT FIND SOLUTION FOR CASTLE PLACEMENT".to_owned(),
            );
        };
        targets.push((&biome.pixels, rect));
    }

    let mut solver = Solver::new();
    let mut vars = Vec::new();
    for &(pixels, rect) in &targets {
        let var = solver.add_variable(domain_inside_pixel_set(rect, pixels, 10));
        solver.add_constraint(Constraint::InsidePixelSet2D {
            var,
            w: CASTLE_WIDTH,
            h: CASTLE_HEIGHT,
            set: pixels,
            rect,
        });
        vars.push(var);
    }

    let values = match solver.solve(&|| world.should_force_stop()) {
        Outcome::Solution(values) => values,
        Outcome::Cancelled => return StageOutcome::Cancelled,
        Outcome::Unsatisfiable => {
            return StageOutcome::Failed(
                "COULD NOT FIND SOLUTION FOR CASTLE PLACEMENT".to_owned(),
            )
        }
    };

    let mut out = StageOutput::default();
    for (&var, &(_, rect)) in vars.iter().zip(&targets) {
        let v = values[var.index()];
        let cx = rect.x + CASTLE_WIDTH / 2 + v % rect.w;
        let cy = rect.y + CASTLE_HEIGHT / 2 + v / rect.w;
        let mut castle = PixelSet::new();
        castle.fill_centered(cx, cy, CASTLE_WIDTH, CASTLE_HEIGHT);
        out.structures.push((StructureKind::Castle, castle));
    }

    info!("castles placed");
    StageOutcome::Done(out)
}

/// Calls `make` for every unordered pair, in index order.
fn between<'a, F>(vars: &[VarId], mut make: F) -> Vec<Constraint<'a>>
where
    F: FnMut(VarId, VarId) -> Constraint<'a>,
{
    let mut constraints = Vec::new();
    for (i, &a) in vars.iter().enumerate() {
        for &b in &vars[i + 1..] {
            constraints.push(make(a, b));
        }
    }
    constraints
}

/// Carves a hill: a spline through three control points, filled from the
/// curve down to the rect bottom. The feet slope at ±1.
pub(crate) fn carve_hill(rect: Rect, rng: &mut fastrand::Rng) -> PixelSet {
    let sx = f64::from(rect.x);
    let cx = f64::from(rect.x + rect.w / 4 + rng.i32(0..(rect.w / 4).max(1)));
    let ex = f64::from(rect.right());
    let sy = f64::from(rect.bottom() - rng.i32(0..(rect.h / 3).max(1)));
    let ey = sy + f64::from(rng.i32(-8..9));
    let cy = sy.min(ey) - f64::from(20 + rng.i32(0..40));

    let spline = CubicSpline::new(
        vec![sx, cx, ex],
        vec![sy, cy, ey],
        Boundary::FirstDeriv(-1.0),
        Boundary::FirstDeriv(1.0),
    );
    fill_below(rect, &spline)
}

/// Carves a hole: the mirror of a hill, dipping below its endpoints with a
/// small positive curvature at both feet.
pub(crate) fn carve_hole(rect: Rect, rng: &mut fastrand::Rng) -> PixelSet {
    let sx = f64::from(rect.x);
    let cx = f64::from(rect.x + rect.w / 4 + rng.i32(0..(rect.w / 4).max(1)));
    let ex = f64::from(rect.right());
    let sy = f64::from(rect.bottom() - rng.i32(0..(rect.h / 3).max(1)) - 32);
    let ey = sy + f64::from(rng.i32(-8..9));
    let deepest = sy.max(ey);
    let room = (f64::from(rect.bottom() - 1) - deepest).max(1.0) as i32;
    let dip = (8 + rng.i32(0..room)).min(room);
    let cy = deepest + f64::from(dip);

    let spline = CubicSpline::new(
        vec![sx, cx, ex],
        vec![sy, cy, ey],
        Boundary::SecondDeriv(0.1),
        Boundary::SecondDeriv(0.1),
    );
    fill_below(rect, &spline)
}

/// Pixels from the curve down to the rect bottom, per column.
fn fill_below(rect: Rect, spline: &CubicSpline) -> PixelSet {
    let mut set = PixelSet::new();
    for x in rect.x..rect.right() {
        let top = (spline.eval(f64::from(x)) as i32).max(rect.y);
        for y in top..rect.bottom() {
            set.add(x, y);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenConfig;
    use crate::stages::testutil::{apply, with_biomes};
    use crate::world::Phase;

    #[test]
    fn hills_holes_islands_at_full_frequency() {
        // Full-frequency layout: every feature placed, separations honored.
        let world = with_biomes(4200, 1200);
        world.set_config(GenConfig {
            hills_frequency: 1.0,
            holes_frequency: 1.0,
            islands_frequency: 1.0,
            seed: 42,
            ..world.config()
        });
        apply(&world, Phase::Placement, define_hills_holes_islands);

        let structures = world.structures();
        let count = |kind| structures.iter().filter(|s| s.kind == kind).count();
        assert_eq!(count(StructureKind::Hill), 12);
        assert_eq!(count(StructureKind::Hole), 10);
        assert_eq!(count(StructureKind::FloatingIsland), 8);

        // Hills and holes keep clear of each other; centers come from the
        // carved footprints.
        let centers = |kind| -> Vec<i32> {
            structures
                .iter()
                .filter(|s| s.kind == kind)
                .filter_map(|s| s.pixels.bbox())
                .map(|b| b.x + b.w / 2)
                .collect()
        };
        // Footprint centers drift a few columns from the solved anchors, so
        // the checks carry a small tolerance.
        let hills = centers(StructureKind::Hill);
        for (i, &a) in hills.iter().enumerate() {
            for &b in &hills[i + 1..] {
                assert!((a - b).abs() >= 12 + HILL_WIDTH, "hills at {a} and {b}");
            }
        }
        for &hole in &centers(StructureKind::Hole) {
            for &hill in &hills {
                assert!(
                    (hole - hill).abs() >= 12 + HILL_WIDTH,
                    "hole {hole} vs hill {hill}"
                );
            }
        }
    }

    #[test]
    fn narrow_world_is_infeasible() {
        // A 400-wide world leaves no habitable span between the oceans.
        let world = crate::stages::testutil::with_zones(400, 400);
        world.set_config(GenConfig {
            hills_frequency: 1.0,
            ..world.config()
        });
        match define_hills_holes_islands(&world) {
            StageOutcome::Failed(msg) => {
                assert_eq!(msg, "DEFINITION OF HILLS, HOLES, ISLANDS INFEASIBLE");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn zero_frequency_places_nothing() {
        let world = with_biomes(1400, 400);
        world.set_config(GenConfig {
            hills_frequency: 0.0,
            holes_frequency: 0.0,
            islands_frequency: 0.0,
            ..world.config()
        });
        apply(&world, Phase::Placement, define_hills_holes_islands);
        assert!(world.structures().is_empty());
    }

    #[test]
    fn cabins_stay_inside_tundra() {
        // Every cabin cell must be a tundra cell.
        let world = with_biomes(4200, 1200);
        world.set_config(GenConfig {
            cabins_frequency: 0.2,
            ..world.config()
        });
        apply(&world, Phase::Placement, define_cabins);

        let structures = world.structures();
        let cabins: Vec<_> = structures
            .iter()
            .filter(|s| s.kind == StructureKind::Cabin)
            .collect();
        assert_eq!(cabins.len(), 12);

        let biomes = world.biomes();
        let tundra = biomes
            .iter()
            .find(|b| b.kind == BiomeKind::Tundra)
            .expect("tundra");
        for cabin in cabins {
            assert!(cabin.pixels.iter().all(|p| tundra.pixels.contains(p)));
        }
    }

    #[test]
    fn cabins_do_not_overlap() {
        let world = with_biomes(4200, 1200);
        world.set_config(GenConfig {
            cabins_frequency: 0.2,
            ..world.config()
        });
        apply(&world, Phase::Placement, define_cabins);
        let structures = world.structures();
        let mut seen = PixelSet::new();
        for cabin in structures.iter().filter(|s| s.kind == StructureKind::Cabin) {
            for p in cabin.pixels.iter() {
                assert!(seen.insert(p), "{p:?} in two cabins");
            }
        }
    }

    #[test]
    fn degenerate_tundra_makes_cabins_unsatisfiable() {
        // Too few candidate slots for the requested cabin count.
        let world = crate::stages::testutil::with_zones(1400, 400);
        let mut tiny = PixelSet::new();
        tiny.fill_rect(Rect::new(300, 150, 90, 50));
        world.publish_biome(Phase::Biomes, BiomeKind::Tundra, tiny);
        world.set_config(GenConfig {
            cabins_frequency: 1.0,
            ..world.config()
        });
        match define_cabins(&world) {
            StageOutcome::Failed(msg) => {
                assert_eq!(msg, "COULD NOT FIND SOLUTION FOR CABIN PLACEMENT");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn castles_stay_inside_their_biomes() {
        // Each castle must sit inside its designated biome.
        let world = with_biomes(4200, 1200);
        apply(&world, Phase::Placement, define_castles);

        let structures = world.structures();
        let castles: Vec<_> = structures
            .iter()
            .filter(|s| s.kind == StructureKind::Castle)
            .collect();
        assert_eq!(castles.len(), 3);

        let biomes = world.biomes();
        let host_of = |kind| {
            biomes
                .iter()
                .find(|b| b.kind == kind)
                .expect("biome")
        };
        for (castle, kind) in castles
            .iter()
            .zip([BiomeKind::Forest, BiomeKind::Jungle, BiomeKind::Tundra])
        {
            let host = host_of(kind);
            assert!(
                castle.pixels.iter().all(|p| host.pixels.contains(p)),
                "castle escapes {kind:?}"
            );
        }
    }

    #[test]
    fn hill_profile_rises_above_its_feet() {
        let mut rng = fastrand::Rng::with_seed(9);
        let rect = Rect::new(100, 120, 80, 240);
        let hill = carve_hill(rect, &mut rng);
        let bbox = hill.bbox().expect("hill pixels");
        // The peak clears the rect bottom and the carve stays in the rect.
        assert!(bbox.y < rect.bottom() - 15);
        assert_eq!(bbox.bottom(), rect.bottom());
        assert!(bbox.x >= rect.x && bbox.right() <= rect.right());
    }

    #[test]
    fn hole_profile_dips_below_its_rim() {
        let mut rng = fastrand::Rng::with_seed(9);
        let rect = Rect::new(100, 120, 60, 240);
        let hole = carve_hole(rect, &mut rng);
        // Column tops at the rims sit higher than the deepest column top.
        let top_at = |x: i32| {
            hole.iter()
                .filter(|p| p.x == x)
                .map(|p| p.y)
                .min()
                .expect("column")
        };
        let rim = top_at(rect.x).min(top_at(rect.right() - 1));
        let deepest = (rect.x..rect.right()).map(top_at).max().expect("columns");
        assert!(deepest > rim, "deepest {deepest} vs rim {rim}");
    }
}
