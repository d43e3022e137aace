//! Pipeline: phase sequencing, worker dispatch, budgets and regeneration.
//!
//! Phases run in a fixed order. Sequential stages execute on the pipeline
//! thread; budgeted stages run on workers with a `crossbeam-channel`
//! completion channel the pipeline `recv_timeout`s on. A budget overrun
//! raises the sticky force-stop flag and records the stage's error; every
//! other running stage observes the flag at its next poll point and returns.
//!
//! Stage outputs are published here, in stage-table order, which keeps the
//! generated world identical no matter how the workers interleave.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use strata_common::{GenError, GenResult};
use tracing::{info, warn};

use crate::config::GenConfig;
use crate::stages::{stage_index, StageDef, StageOutcome, StageOutput, STAGES};
use crate::world::{Phase, World};

/// Observable pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// No run in flight and no pending error.
    Idle,
    /// A run is in flight.
    Running,
    /// The last run recorded at least one user-visible error.
    Error,
}

/// Per-stage state machine: `NotRun → Running → (Done | Cancelled | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    /// Not dispatched in the current run.
    #[default]
    NotRun,
    /// Currently executing.
    Running,
    /// Completed and published.
    Done,
    /// Observed force-stop and returned early.
    Cancelled,
    /// Failed; its message was recorded.
    Failed,
}

/// Publishes a completed stage's output onto the world.
pub fn publish_output(world: &World, phase: Phase, output: StageOutput) {
    for (kind, rect, pixels) in output.zones {
        world.publish_zone(phase, kind, rect, pixels);
    }
    for (kind, pixels) in output.biomes {
        world.publish_biome(phase, kind, pixels);
    }
    for (kind, pixels) in output.structures {
        world.publish_structure(phase, kind, pixels);
    }
    if let Some(line) = output.surface_line {
        world.set_surface_line(line);
    }
}

/// Drives the stage pipeline against one world.
///
/// `run`/`regenerate` execute on a background thread; `status`, `pop_error`
/// and the world's read interface are safe to poll from any thread.
pub struct Generator {
    world: Arc<World>,
    states: Arc<Mutex<Vec<StageState>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Generator {
    /// Creates a generator for a validated configuration.
    pub fn new(config: GenConfig) -> GenResult<Self> {
        config.validate()?;
        Ok(Self {
            world: Arc::new(World::new(config)),
            states: Arc::new(Mutex::new(vec![StageState::default(); STAGES.len()])),
            handle: Mutex::new(None),
        })
    }

    /// The generated world; hold the `Arc` to read state while runs proceed.
    #[must_use]
    pub fn world(&self) -> Arc<World> {
        Arc::clone(&self.world)
    }

    /// Starts a full generation with `config` on a background thread.
    ///
    /// Any in-flight run is force-stopped and drained first.
    pub fn run(&self, config: GenConfig) -> GenResult<()> {
        config.validate()?;
        self.interrupt();
        self.world.set_config(config);
        self.world.clear_from(Phase::Horizontal);
        self.start_from(Phase::Horizontal);
        Ok(())
    }

    /// Cancels the in-flight run and reruns from the minimum phase the
    /// config change affects.
    pub fn regenerate(&self, config: GenConfig) -> GenResult<()> {
        config.validate()?;
        self.interrupt();
        let from = self.world.config().min_affected_phase(&config);
        info!(?from, "regenerating");
        self.world.set_config(config);
        self.world.clear_from(from);
        self.start_from(from);
        Ok(())
    }

    /// Blocking variant of [`Generator::run`]; returns when the pipeline
    /// finishes, or `Cancelled` if a force-stop cut the run short.
    pub fn run_blocking(&self, config: GenConfig) -> GenResult<()> {
        config.validate()?;
        self.interrupt();
        self.world.set_config(config);
        self.world.clear_from(Phase::Horizontal);
        execute_from(&self.world, &self.states, Phase::Horizontal);
        if self.world.should_force_stop() {
            return Err(GenError::Cancelled);
        }
        Ok(())
    }

    /// Blocking variant of [`Generator::regenerate`].
    pub fn regenerate_blocking(&self, config: GenConfig) -> GenResult<()> {
        config.validate()?;
        self.interrupt();
        let from = self.world.config().min_affected_phase(&config);
        self.world.set_config(config);
        self.world.clear_from(from);
        execute_from(&self.world, &self.states, from);
        if self.world.should_force_stop() {
            return Err(GenError::Cancelled);
        }
        Ok(())
    }

    /// Waits for the in-flight run, if any, to finish.
    pub fn wait(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Pipeline status and the current progress message.
    #[must_use]
    pub fn status(&self) -> (RunStatus, String) {
        let status = if self.world.is_generating() {
            RunStatus::Running
        } else if self.world.has_error() {
            RunStatus::Error
        } else {
            RunStatus::Idle
        };
        (status, self.world.progress())
    }

    /// Consumes the most recent user-visible error message.
    #[must_use]
    pub fn pop_error(&self) -> Option<String> {
        self.world.pop_error().map(|e| e.to_string())
    }

    /// State of a stage by name.
    #[must_use]
    pub fn stage_state(&self, name: &str) -> Option<StageState> {
        stage_index(name).map(|i| self.states.lock()[i])
    }

    fn interrupt(&self) {
        self.world.set_force_stop(true);
        self.wait();
    }

    fn start_from(&self, from: Phase) {
        let world = Arc::clone(&self.world);
        let states = Arc::clone(&self.states);
        let handle = std::thread::spawn(move || execute_from(&world, &states, from));
        *self.handle.lock() = Some(handle);
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.interrupt();
    }
}

/// Runs phases `from..=Underground` to completion.
fn execute_from(world: &Arc<World>, states: &Mutex<Vec<StageState>>, from: Phase) {
    world.set_generating(true);
    // Force-stop is sticky within a run; it clears only here.
    world.set_force_stop(false);
    world.clear_errors();
    {
        let mut states = states.lock();
        for (i, def) in STAGES.iter().enumerate() {
            if def.phase >= from {
                states[i] = StageState::NotRun;
            }
        }
    }

    let cfg = world.config();
    let mut aborted = false;
    // (stage index, completion handle) pairs not yet drained.
    let mut pending: Vec<(usize, Receiver<StageOutcome>)> = Vec::new();

    // Phase 0 — horizontal zones.
    if from <= Phase::Horizontal {
        aborted |= run_inline(world, states, "define_horizontal");
    }

    // Caves may run alongside phases 1-3 once the zones exist.
    let caves_idx = stage_index("generate_caves").unwrap_or_default();
    let caves_early = cfg.early_caves && from <= Phase::Underground;
    if caves_early && !aborted && !world.should_force_stop() {
        pending.push((caves_idx, spawn_stage(world, states, caves_idx)));
    }

    // Phase 1 — biomes.
    if from <= Phase::Biomes && !aborted && !world.should_force_stop() {
        aborted |= run_inline(world, states, "define_biomes");
    }

    // Phase 2 — concurrent placement, one budget each.
    if from <= Phase::Placement && !aborted && !world.should_force_stop() {
        let placement: Vec<usize> = STAGES
            .iter()
            .enumerate()
            .filter(|(_, def)| def.phase == Phase::Placement)
            .map(|(i, _)| i)
            .collect();
        let handles: Vec<(usize, Receiver<StageOutcome>)> = placement
            .iter()
            .map(|&i| (i, spawn_stage(world, states, i)))
            .collect();
        for (i, rx) in handles {
            aborted |= drain_stage(world, states, i, &rx);
        }
    }

    // Phase 3 — surface shaping; trees get a worker and a budget.
    if from <= Phase::Surface && !aborted {
        for (i, def) in STAGES.iter().enumerate() {
            if def.phase != Phase::Surface {
                continue;
            }
            if world.should_force_stop() || aborted {
                break;
            }
            if def.budget.is_some() {
                let rx = spawn_stage(world, states, i);
                aborted |= drain_stage(world, states, i, &rx);
            } else {
                aborted |= run_inline(world, states, def.name);
            }
        }
    }

    // Drain pending handles before anything that depends on them.
    for (i, rx) in pending.drain(..) {
        aborted |= drain_stage(world, states, i, &rx);
    }

    // Phase 4 — caves (if not already dispatched) and the material passes.
    if from <= Phase::Underground && !aborted {
        for (i, def) in STAGES.iter().enumerate() {
            if def.phase != Phase::Underground {
                continue;
            }
            if i == caves_idx && caves_early {
                continue;
            }
            if world.should_force_stop() || aborted {
                break;
            }
            if def.budget.is_some() {
                let rx = spawn_stage(world, states, i);
                aborted |= drain_stage(world, states, i, &rx);
            } else {
                aborted |= run_inline(world, states, def.name);
            }
        }
    }

    world.set_progress("");
    world.set_generating(false);
    info!(aborted, "pipeline finished");
}

/// Runs one stage on the pipeline thread. Returns true when the failure is
/// critical and the run must abort.
fn run_inline(world: &Arc<World>, states: &Mutex<Vec<StageState>>, name: &str) -> bool {
    let Some(idx) = stage_index(name) else {
        return false;
    };
    let def = &STAGES[idx];
    if world.should_force_stop() {
        states.lock()[idx] = StageState::Cancelled;
        return false;
    }
    world.set_progress(def.progress);
    states.lock()[idx] = StageState::Running;
    let outcome = (def.run)(world);
    apply_outcome(world, states, idx, outcome)
}

/// Dispatches one stage on a worker thread.
fn spawn_stage(
    world: &Arc<World>,
    states: &Mutex<Vec<StageState>>,
    idx: usize,
) -> Receiver<StageOutcome> {
    let def = &STAGES[idx];
    states.lock()[idx] = StageState::Running;
    let (tx, rx) = bounded(1);
    let world = Arc::clone(world);
    std::thread::spawn(move || {
        let outcome = (def.run)(&world);
        let _ = tx.send(outcome);
    });
    rx
}

/// Waits for a worker within its budget. On overrun the force-stop flag is
/// raised, the stage error recorded, and the late result discarded.
fn drain_stage(
    world: &Arc<World>,
    states: &Mutex<Vec<StageState>>,
    idx: usize,
    rx: &Receiver<StageOutcome>,
) -> bool {
    let def = &STAGES[idx];
    world.set_progress(def.progress);
    let Some(budget) = def.budget else {
        // Budget-less stages never reach the worker path.
        return false;
    };
    match rx.recv_timeout(budget.limit) {
        Ok(outcome) => apply_outcome(world, states, idx, outcome),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stage = def.name, "budget exceeded, raising force-stop");
            world.set_force_stop(true);
            world.push_error(GenError::Timeout(budget.error.to_owned()));
            states.lock()[idx] = StageState::Failed;
            // The worker observes the flag at its next poll; its result is
            // dropped so a timed-out stage publishes nothing.
            let _ = rx.recv();
            def.critical
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!(stage = def.name, "worker vanished");
            world.push_error(GenError::Timeout(budget.error.to_owned()));
            states.lock()[idx] = StageState::Failed;
            def.critical
        }
    }
}

/// Publishes or records one stage outcome. Returns true for a critical
/// failure.
fn apply_outcome(
    world: &Arc<World>,
    states: &Mutex<Vec<StageState>>,
    idx: usize,
    outcome: StageOutcome,
) -> bool {
    let def: &StageDef = &STAGES[idx];
    match outcome {
        StageOutcome::Done(output) => {
            publish_output(world, def.phase, output);
            states.lock()[idx] = StageState::Done;
            false
        }
        StageOutcome::Cancelled => {
            states.lock()[idx] = StageState::Cancelled;
            false
        }
        StageOutcome::Failed(message) => {
            warn!(stage = def.name, %message, "stage failed");
            world.push_error(GenError::Infeasible(message));
            states.lock()[idx] = StageState::Failed;
            def.critical
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{BiomeKind, StructureKind, ZoneKind};

    fn small_config() -> GenConfig {
        GenConfig {
            width: 1400,
            height: 400,
            seed: 7,
            hills_frequency: 0.1,
            holes_frequency: 0.1,
            islands_frequency: 0.2,
            cabins_frequency: 0.05,
            ..GenConfig::default()
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = GenConfig {
            width: -5,
            ..GenConfig::default()
        };
        assert!(matches!(Generator::new(bad), Err(GenError::ConfigInvalid(_))));
    }

    #[test]
    fn full_run_populates_every_layer() {
        let gen = Generator::new(small_config()).expect("config");
        gen.run_blocking(small_config()).expect("run");
        let world = gen.world();

        assert_eq!(world.zones().len(), 5);
        assert!(world.biomes().len() >= 4);
        let structures = world.structures();
        for kind in [
            StructureKind::Hill,
            StructureKind::Hole,
            StructureKind::FloatingIsland,
            StructureKind::Cabin,
            StructureKind::SurfacePart,
            StructureKind::Water,
            StructureKind::GrassSurface,
            StructureKind::Tree,
            StructureKind::Cave,
            StructureKind::Ore,
            StructureKind::TransitionMaterial,
        ] {
            assert!(
                structures.iter().any(|s| s.kind == kind),
                "no {kind:?} structure generated"
            );
        }
        let (status, message) = gen.status();
        assert_eq!(message, "");
        // Castles cannot fit this shallow world, which surfaces as a
        // recorded, non-fatal error.
        assert_eq!(status, RunStatus::Error);
        assert_eq!(
            gen.pop_error().as_deref(),
            Some("COULD NOT FIND SOLUTION FOR CASTLE PLACEMENT")
        );
        assert_eq!(gen.stage_state("define_castles"), Some(StageState::Failed));
        assert_eq!(gen.stage_state("generate_caves"), Some(StageState::Done));
    }

    #[test]
    fn runs_are_deterministic_for_a_seed() {
        // Two runs with identical seed and config yield equal world state.
        let a = Generator::new(small_config()).expect("config");
        a.run_blocking(small_config()).expect("run");
        let b = Generator::new(small_config()).expect("config");
        b.run_blocking(small_config()).expect("run");

        let (wa, wb) = (a.world(), b.world());
        assert_eq!(*wa.zones(), *wb.zones());
        assert_eq!(*wa.biomes(), *wb.biomes());
        assert_eq!(*wa.structures(), *wb.structures());
        assert_eq!(*wa.surface_line(), *wb.surface_line());
        for (x, y) in [(0, 0), (700, 150), (123, 350), (1399, 399)] {
            assert_eq!(wa.meta_at(x, y), wb.meta_at(x, y));
        }
    }

    #[test]
    fn early_caves_produce_the_same_world() {
        let gen_seq = Generator::new(small_config()).expect("config");
        gen_seq.run_blocking(small_config()).expect("run");
        let early = GenConfig {
            early_caves: true,
            ..small_config()
        };
        let gen_par = Generator::new(early.clone()).expect("config");
        gen_par.run_blocking(early).expect("run");

        let (ws, wp) = (gen_seq.world(), gen_par.world());
        assert_eq!(*ws.structures(), *wp.structures());
    }

    #[test]
    fn infeasible_placement_skips_later_phases() {
        // A 400-wide world has no habitable placement span.
        let cfg = GenConfig {
            width: 400,
            height: 400,
            hills_frequency: 1.0,
            ..GenConfig::default()
        };
        let gen = Generator::new(cfg.clone()).expect("config");
        gen.run_blocking(cfg).expect("run");

        assert_eq!(
            gen.stage_state("define_hills_holes_islands"),
            Some(StageState::Failed)
        );
        // Everything downstream of the critical failure never ran.
        assert_eq!(gen.stage_state("define_surface"), Some(StageState::NotRun));
        assert_eq!(gen.stage_state("generate_caves"), Some(StageState::NotRun));
        let mut errors = Vec::new();
        while let Some(e) = gen.pop_error() {
            errors.push(e);
        }
        assert!(errors
            .iter()
            .any(|e| e == "DEFINITION OF HILLS, HOLES, ISLANDS INFEASIBLE"));
        let world = gen.world();
        assert!(world.surface_line().is_empty());
    }

    #[test]
    fn non_critical_failure_keeps_pipeline_running() {
        // Castles cannot fit a 300-tall world; surface shaping continues.
        let gen = Generator::new(small_config()).expect("config");
        gen.run_blocking(small_config()).expect("run");
        assert_eq!(gen.stage_state("define_castles"), Some(StageState::Failed));
        assert_eq!(gen.stage_state("define_surface"), Some(StageState::Done));
        assert_eq!(gen.stage_state("generate_cave_lakes"), Some(StageState::Done));
    }

    #[test]
    fn force_stop_cancels_a_fresh_run() {
        let gen = Generator::new(small_config()).expect("config");
        let world = gen.world();
        gen.run(small_config()).expect("run started");
        // The flag is observed within a bounded number of polls.
        world.set_force_stop(true);
        gen.wait();
        let states: Vec<StageState> = STAGES
            .iter()
            .map(|d| gen.stage_state(d.name).expect("state"))
            .collect();
        assert!(states
            .iter()
            .all(|s| !matches!(s, StageState::Running)));
    }

    #[test]
    fn regenerate_reproduces_identical_state() {
        // Regenerating with the same config reproduces the same world.
        let gen = Generator::new(small_config()).expect("config");
        gen.run_blocking(small_config()).expect("run");
        let first: Vec<_> = gen.world().structures().clone();

        gen.regenerate_blocking(small_config()).expect("regen");
        let second: Vec<_> = gen.world().structures().clone();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.pixels, b.pixels);
            // Ids moved forward: never reused across clears.
            assert!(b.id.raw() > a.id.raw());
        }
    }

    #[test]
    fn regenerate_from_placement_preserves_biomes() {
        let gen = Generator::new(small_config()).expect("config");
        gen.run_blocking(small_config()).expect("run");
        let world = gen.world();
        let biome_ids: Vec<_> = world.biomes().iter().map(|b| b.id).collect();

        let denser = GenConfig {
            cabins_frequency: 0.1,
            ..small_config()
        };
        gen.regenerate_blocking(denser).expect("regen");
        let after: Vec<_> = world.biomes().iter().map(|b| b.id).collect();
        assert_eq!(biome_ids, after, "phase 1 state was rebuilt needlessly");
        let cabins = world
            .structures()
            .iter()
            .filter(|s| s.kind == StructureKind::Cabin)
            .count();
        assert_eq!(cabins, 6);
    }

    #[test]
    fn clear_restores_end_of_placement_snapshot() {
        // Clearing from the surface phase leaves exactly the earlier state.
        let gen = Generator::new(small_config()).expect("config");
        gen.run_blocking(small_config()).expect("run");
        let world = gen.world();

        let placement_structures: Vec<_> = world
            .structures()
            .iter()
            .filter(|s| s.phase <= Phase::Placement)
            .cloned()
            .collect();
        world.clear_from(Phase::Surface);
        assert_eq!(*world.structures(), placement_structures);
        assert!(world.surface_line().is_empty());
        assert_eq!(world.zones().len(), 5);
    }

    #[test]
    fn renderer_queries_resolve_after_a_run() {
        let gen = Generator::new(small_config()).expect("config");
        gen.run_blocking(small_config()).expect("run");
        let world = gen.world();
        let surface = world.zone_rect(ZoneKind::Surface).expect("surface");

        let (zone, biome, _structure) = world
            .cell_info(0, surface.y)
            .expect("cell inside the world");
        assert_eq!(zone, Some(ZoneKind::Surface));
        assert_eq!(biome, Some(BiomeKind::OceanLeft));

        let (zone, biome, _) = world.cell_info(5, 5).expect("space cell");
        assert_eq!(zone, Some(ZoneKind::Space));
        assert_eq!(biome, None);
    }
}
