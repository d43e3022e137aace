//! Phase 0: partition the world into horizontal zone bands.

use strata_common::{PixelSet, Rect};
use tracing::info;

use crate::stages::{StageOutcome, StageOutput};
use crate::world::{World, ZoneKind};

/// Deterministic partition of the world height into the five bands.
///
/// Band heights, top to bottom, as fractions of the world height:
/// 2/20, 4/20, 4/20 + 1, 7/20, 3/20. Integer division can leave a remainder;
/// the bottom band swallows it (its pixels are clipped to the world rect,
/// its nominal rect is not).
pub(crate) fn define_horizontal(world: &World) -> StageOutcome {
    let (width, height) = (world.width(), world.height());

    let space = Rect::new(0, 0, width, 2 * height / 20);
    let surface = Rect::new(0, space.bottom(), width, 4 * height / 20);
    let underground = Rect::new(0, surface.bottom(), width, 4 * height / 20 + 1);
    let cavern = Rect::new(0, underground.bottom(), width, 7 * height / 20);
    let hell = Rect::new(0, cavern.bottom(), width, 3 * height / 20);

    let world_rect = Rect::new(0, 0, width, height);
    let bands = [
        (ZoneKind::Space, space),
        (ZoneKind::Surface, surface),
        (ZoneKind::Underground, underground),
        (ZoneKind::Cavern, cavern),
        (ZoneKind::Hell, hell),
    ];

    let mut out = StageOutput::default();
    for (kind, rect) in bands {
        if world.should_force_stop() {
            return StageOutcome::Cancelled;
        }
        let mut pixels = PixelSet::new();
        let clipped = match kind {
            // The bottom band owns every remaining row.
            ZoneKind::Hell => Rect::new(rect.x, rect.y, rect.w, height - rect.y),
            _ => rect,
        };
        if let Some(visible) = clipped.intersection(world_rect) {
            pixels.fill_rect(visible);
        }
        out.zones.push((kind, rect, pixels));
    }

    info!(width, height, "horizontal areas defined");
    StageOutcome::Done(out)
}
