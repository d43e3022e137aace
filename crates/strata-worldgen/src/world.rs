//! World state: horizontal zones, biomes, structures, per-cell metadata.
//!
//! Collections live behind `parking_lot::RwLock`s so the pipeline's worker
//! threads and any renderer can read concurrently. Mutation goes through the
//! `publish_*` methods, called by the pipeline in stage-table order — a
//! reader sees each pixel set either empty or in the final state its stage
//! produced.
//!
//! Metadata cells store raw entity ids rather than references; the world
//! resolves them through its own tables. Every entity remembers the phase
//! that produced it, ids grow monotonically and are never reused, and
//! [`World::clear_from`] drops entities of a phase range while scrubbing the
//! stale ids out of the metadata grid.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use strata_common::{rng::stage_rng, BiomeId, GenError, PixelSet, Rect, StructureId, ZoneId};
use tracing::debug;

use crate::config::GenConfig;

/// Pipeline phase; also the granularity of [`World::clear_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Horizontal zone bands.
    Horizontal,
    /// Regional biomes.
    Biomes,
    /// CSP feature placement (hills/holes/islands, cabins, castles).
    Placement,
    /// Surface shaping and surface materials.
    Surface,
    /// Caves, underground materials and ores.
    Underground,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 5] = [
        Phase::Horizontal,
        Phase::Biomes,
        Phase::Placement,
        Phase::Surface,
        Phase::Underground,
    ];
}

/// Tag of a horizontal zone band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneKind {
    /// Sky band above the playable surface.
    Space,
    /// Surface band; terrain shaping happens here.
    Surface,
    /// Shallow underground band.
    Underground,
    /// Deep cavern band.
    Cavern,
    /// Bottom band.
    Hell,
}

/// Tag of a biome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BiomeKind {
    /// Ocean strip at the left world edge.
    OceanLeft,
    /// Ocean strip at the right world edge.
    OceanRight,
    /// Cold slanted strip.
    Tundra,
    /// Wet slanted strip.
    Jungle,
    /// Everything the other biomes left over, one instance per connected
    /// component.
    Forest,
}

/// Tag of a structure (minibiome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureKind {
    /// Spline-carved bump on the surface.
    Hill,
    /// Spline-carved depression in the surface.
    Hole,
    /// Elliptical island floating in the upper surface band.
    FloatingIsland,
    /// Buried cabin in the tundra underground.
    Cabin,
    /// Large buried castle, one per major biome.
    Castle,
    /// Carved cave volume.
    Cave,
    /// Grass lining on terrain or island tops.
    GrassSurface,
    /// Trunk-and-canopy tree.
    Tree,
    /// Standing water.
    Water,
    /// Sand lining (beaches, ocean floors).
    Sand,
    /// Ore deposit.
    Ore,
    /// Material transition blob or cliff face fill.
    TransitionMaterial,
    /// Contiguous run of base surface terrain.
    SurfacePart,
}

/// A horizontal zone: a full-width band of the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    /// Stable id.
    pub id: ZoneId,
    /// Band tag.
    pub kind: ZoneKind,
    /// Nominal band rect (the bottom band may extend past the world edge;
    /// `pixels` is always clipped to the world).
    pub rect: Rect,
    /// Covered cells.
    pub pixels: PixelSet,
    /// Phase that produced the zone.
    pub phase: Phase,
}

/// A biome: a tagged region of the surface-to-hell band.
#[derive(Debug, Clone, PartialEq)]
pub struct Biome {
    /// Stable id.
    pub id: BiomeId,
    /// Biome tag.
    pub kind: BiomeKind,
    /// Covered cells.
    pub pixels: PixelSet,
    /// Phase that produced the biome.
    pub phase: Phase,
}

/// A structure (minibiome): a localized tagged feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    /// Stable id.
    pub id: StructureId,
    /// Structure tag.
    pub kind: StructureKind,
    /// Covered cells.
    pub pixels: PixelSet,
    /// Phase that produced the structure.
    pub phase: Phase,
}

/// Per-cell entity references, by raw id; null ids mean "none".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellMeta {
    /// Containing horizontal zone.
    pub zone: ZoneId,
    /// Containing biome, if any.
    pub biome: BiomeId,
    /// Primary structure, if any (last writer in stage order wins).
    pub structure: StructureId,
}

#[derive(Debug)]
struct MetaGrid {
    width: i32,
    height: i32,
    cells: Vec<CellMeta>,
}

impl MetaGrid {
    fn new(width: i32, height: i32) -> Self {
        let len = (width.max(0) as usize) * (height.max(0) as usize);
        Self {
            width,
            height,
            cells: vec![CellMeta::default(); len],
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    fn get(&self, x: i32, y: i32) -> Option<CellMeta> {
        self.index(x, y).map(|i| self.cells[i])
    }
}

/// The generated world and its status surface.
pub struct World {
    config: RwLock<GenConfig>,
    next_id: AtomicU32,
    zones: RwLock<Vec<Zone>>,
    biomes: RwLock<Vec<Biome>>,
    structures: RwLock<Vec<Structure>>,
    meta: RwLock<MetaGrid>,
    surface_line: RwLock<Vec<i32>>,
    force_stop: AtomicBool,
    generating: AtomicBool,
    progress: Mutex<String>,
    errors: Mutex<Vec<GenError>>,
}

impl World {
    /// Creates an empty world for a validated configuration.
    #[must_use]
    pub fn new(config: GenConfig) -> Self {
        let meta = MetaGrid::new(config.width, config.height);
        Self {
            config: RwLock::new(config),
            next_id: AtomicU32::new(1),
            zones: RwLock::new(Vec::new()),
            biomes: RwLock::new(Vec::new()),
            structures: RwLock::new(Vec::new()),
            meta: RwLock::new(meta),
            surface_line: RwLock::new(Vec::new()),
            force_stop: AtomicBool::new(false),
            generating: AtomicBool::new(false),
            progress: Mutex::new(String::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> GenConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration. The caller is responsible for clearing
    /// the phases the change invalidates.
    pub fn set_config(&self, config: GenConfig) {
        *self.config.write() = config;
    }

    /// World width in cells.
    #[must_use]
    pub fn width(&self) -> i32 {
        self.config.read().width
    }

    /// World height in cells.
    #[must_use]
    pub fn height(&self) -> i32 {
        self.config.read().height
    }

    /// World seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.config.read().seed
    }

    /// The RNG sub-stream for a stage.
    #[must_use]
    pub fn rng(&self, stage: &str) -> fastrand::Rng {
        stage_rng(self.seed(), stage)
    }

    // --- cancellation and status -------------------------------------------

    /// True once a cancel was requested; sticky for the rest of the run.
    #[must_use]
    pub fn should_force_stop(&self) -> bool {
        self.force_stop.load(Ordering::Acquire)
    }

    /// Raises or clears the cooperative cancellation flag.
    pub fn set_force_stop(&self, value: bool) {
        self.force_stop.store(value, Ordering::Release);
    }

    /// True while the pipeline is executing.
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    /// Marks the pipeline as running or idle.
    pub fn set_generating(&self, value: bool) {
        self.generating.store(value, Ordering::Release);
    }

    /// Current progress message.
    #[must_use]
    pub fn progress(&self) -> String {
        self.progress.lock().clone()
    }

    /// Replaces the progress message.
    pub fn set_progress(&self, message: &str) {
        *self.progress.lock() = message.to_owned();
    }

    /// Records a user-visible error.
    pub fn push_error(&self, error: GenError) {
        self.errors.lock().push(error);
    }

    /// Consumes and returns the most recent error.
    #[must_use]
    pub fn pop_error(&self) -> Option<GenError> {
        self.errors.lock().pop()
    }

    /// True if any error is pending.
    #[must_use]
    pub fn has_error(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    /// Drops all pending errors.
    pub fn clear_errors(&self) {
        self.errors.lock().clear();
    }

    // --- collections -------------------------------------------------------

    /// Read access to the zones, in publication order.
    #[must_use]
    pub fn zones(&self) -> RwLockReadGuard<'_, Vec<Zone>> {
        self.zones.read()
    }

    /// Read access to the biomes, in publication order.
    #[must_use]
    pub fn biomes(&self) -> RwLockReadGuard<'_, Vec<Biome>> {
        self.biomes.read()
    }

    /// Read access to the structures, in publication order.
    #[must_use]
    pub fn structures(&self) -> RwLockReadGuard<'_, Vec<Structure>> {
        self.structures.read()
    }

    /// Nominal rect of the zone with the given tag.
    #[must_use]
    pub fn zone_rect(&self, kind: ZoneKind) -> Option<Rect> {
        self.zones
            .read()
            .iter()
            .find(|z| z.kind == kind)
            .map(|z| z.rect)
    }

    /// The zone containing row `y`; the bottom band extends to the world
    /// bottom, so every in-range row resolves to exactly one zone.
    #[must_use]
    pub fn zone_at(&self, y: i32) -> Option<(ZoneId, ZoneKind)> {
        if y < 0 || y >= self.height() {
            return None;
        }
        let zones = self.zones.read();
        for zone in zones.iter() {
            if y >= zone.rect.y && y < zone.rect.bottom() {
                return Some((zone.id, zone.kind));
            }
        }
        // Integer band heights can leave a remainder above the world bottom;
        // those rows belong to the lowest band.
        zones
            .last()
            .filter(|z| y >= z.rect.y)
            .map(|z| (z.id, z.kind))
    }

    /// Per-column terrain top line, filled during surface shaping.
    #[must_use]
    pub fn surface_line(&self) -> RwLockReadGuard<'_, Vec<i32>> {
        self.surface_line.read()
    }

    /// Replaces the terrain top line.
    pub fn set_surface_line(&self, line: Vec<i32>) {
        *self.surface_line.write() = line;
    }

    // --- metadata ----------------------------------------------------------

    /// Raw metadata for a cell.
    #[must_use]
    pub fn meta_at(&self, x: i32, y: i32) -> Option<CellMeta> {
        self.meta.read().get(x, y)
    }

    /// Resolved (zone, biome, structure) tags for a cell.
    #[must_use]
    pub fn cell_info(
        &self,
        x: i32,
        y: i32,
    ) -> Option<(Option<ZoneKind>, Option<BiomeKind>, Option<StructureKind>)> {
        let meta = self.meta_at(x, y)?;
        Some((
            self.zone_kind(meta.zone),
            self.biome_kind(meta.biome),
            self.structure_kind(meta.structure),
        ))
    }

    /// Resolves a zone id, if it is live.
    #[must_use]
    pub fn zone_kind(&self, id: ZoneId) -> Option<ZoneKind> {
        if !id.is_valid() {
            return None;
        }
        let zones = self.zones.read();
        zones
            .binary_search_by_key(&id, |z| z.id)
            .ok()
            .map(|i| zones[i].kind)
    }

    /// Resolves a biome id, if it is live.
    #[must_use]
    pub fn biome_kind(&self, id: BiomeId) -> Option<BiomeKind> {
        if !id.is_valid() {
            return None;
        }
        let biomes = self.biomes.read();
        biomes
            .binary_search_by_key(&id, |b| b.id)
            .ok()
            .map(|i| biomes[i].kind)
    }

    /// Resolves a structure id, if it is live.
    #[must_use]
    pub fn structure_kind(&self, id: StructureId) -> Option<StructureKind> {
        if !id.is_valid() {
            return None;
        }
        let structures = self.structures.read();
        structures
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|i| structures[i].kind)
    }

    // --- publication -------------------------------------------------------

    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Publishes a zone and stamps its cells' metadata.
    pub fn publish_zone(&self, phase: Phase, kind: ZoneKind, rect: Rect, pixels: PixelSet) -> ZoneId {
        let id = ZoneId::from_raw(self.alloc_id());
        {
            let mut meta = self.meta.write();
            for p in pixels.iter() {
                if let Some(i) = meta.index(p.x, p.y) {
                    meta.cells[i].zone = id;
                }
            }
        }
        self.zones.write().push(Zone {
            id,
            kind,
            rect,
            pixels,
            phase,
        });
        id
    }

    /// Publishes a biome and stamps its cells' metadata.
    pub fn publish_biome(&self, phase: Phase, kind: BiomeKind, pixels: PixelSet) -> BiomeId {
        let id = BiomeId::from_raw(self.alloc_id());
        {
            let mut meta = self.meta.write();
            for p in pixels.iter() {
                if let Some(i) = meta.index(p.x, p.y) {
                    meta.cells[i].biome = id;
                }
            }
        }
        self.biomes.write().push(Biome {
            id,
            kind,
            pixels,
            phase,
        });
        id
    }

    /// Publishes a structure and stamps its cells' metadata; the structure
    /// becomes the primary one for every cell it covers.
    pub fn publish_structure(
        &self,
        phase: Phase,
        kind: StructureKind,
        pixels: PixelSet,
    ) -> StructureId {
        let id = StructureId::from_raw(self.alloc_id());
        {
            let mut meta = self.meta.write();
            for p in pixels.iter() {
                if let Some(i) = meta.index(p.x, p.y) {
                    meta.cells[i].structure = id;
                }
            }
        }
        self.structures.write().push(Structure {
            id,
            kind,
            pixels,
            phase,
        });
        id
    }

    // --- clearing ----------------------------------------------------------

    /// Resets all state produced at or after `phase`, preserving earlier
    /// phases. Ids of dropped entities are never reused; stale references
    /// are scrubbed from the metadata grid.
    pub fn clear_from(&self, phase: Phase) {
        let mut zones = self.zones.write();
        let mut biomes = self.biomes.write();
        let mut structures = self.structures.write();
        let mut meta = self.meta.write();

        if phase == Phase::Horizontal {
            // Full reset; the grid is rebuilt for the current dimensions.
            zones.clear();
            biomes.clear();
            structures.clear();
            let cfg = self.config.read();
            *meta = MetaGrid::new(cfg.width, cfg.height);
            self.surface_line.write().clear();
            debug!("cleared world from phase {phase:?}");
            return;
        }

        let mut dead_zones = rustc_hash::FxHashSet::default();
        let mut dead_biomes = rustc_hash::FxHashSet::default();
        let mut dead_structures = rustc_hash::FxHashSet::default();

        zones.retain(|z| {
            let keep = z.phase < phase;
            if !keep {
                dead_zones.insert(z.id);
            }
            keep
        });
        biomes.retain(|b| {
            let keep = b.phase < phase;
            if !keep {
                dead_biomes.insert(b.id);
            }
            keep
        });
        structures.retain(|s| {
            let keep = s.phase < phase;
            if !keep {
                dead_structures.insert(s.id);
            }
            keep
        });

        if !dead_zones.is_empty() || !dead_biomes.is_empty() || !dead_structures.is_empty() {
            for cell in &mut meta.cells {
                if dead_zones.contains(&cell.zone) {
                    cell.zone = ZoneId::NULL;
                }
                if dead_biomes.contains(&cell.biome) {
                    cell.biome = BiomeId::NULL;
                }
                if dead_structures.contains(&cell.structure) {
                    cell.structure = StructureId::NULL;
                }
            }
        }

        if phase <= Phase::Surface {
            self.surface_line.write().clear();
        }
        debug!(
            zones = dead_zones.len(),
            biomes = dead_biomes.len(),
            structures = dead_structures.len(),
            "cleared world from phase {phase:?}"
        );
    }
}
