use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::PlayerSlot;
use crate::pipeline::StatKind;

/// Rectangle in fractions of the frame size: `x1..x2` horizontally, `y1..y2` vertically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x1: f32,
    pub x2: f32,
    pub y1: f32,
    pub y2: f32,
}

impl CropRegion {
    pub const fn new(x1: f32, x2: f32, y1: f32, y2: f32) -> Self {
        Self { x1, x2, y1, y2 }
    }

    /// Pixel rectangle `(x, y, width, height)` for a frame of the given size, or `None`
    /// when it rounds to nothing.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let scale = |fraction: f32, extent: u32| {
            (fraction.clamp(0.0, 1.0) * extent as f32).round() as u32
        };
        let (left, right) = (scale(self.x1, width), scale(self.x2, width));
        let (top, bottom) = (scale(self.y1, height), scale(self.y2, height));
        (right > left && bottom > top).then(|| (left, top, right - left, bottom - top))
    }

    pub fn crop(&self, image: &DynamicImage) -> Option<DynamicImage> {
        let (x, y, width, height) = self.pixel_bounds(image.width(), image.height())?;
        Some(image.crop_imm(x, y, width, height))
    }
}

/// Where each player's HUD fields sit on a split-screen frame.
#[derive(Debug, Clone)]
pub struct RegionLayout {
    regions: HashMap<(PlayerSlot, StatKind), CropRegion>,
}

impl Default for RegionLayout {
    fn default() -> Self {
        use StatKind::*;
        let p1 = [
            (Position, CropRegion::new(0.38, 0.47, 0.84, 0.97)),
            (Coins, CropRegion::new(0.056, 0.09, 0.92, 0.965)),
            (LapNum, CropRegion::new(0.121, 0.135, 0.925, 0.9635)),
            (RaceLaps, CropRegion::new(0.146, 0.161, 0.925, 0.9635)),
            (ItemSlot1, CropRegion::new(0.08, 0.164, 0.08, 0.23)),
            (ItemSlot2, CropRegion::new(0.039, 0.082, 0.047, 0.13)),
        ];
        let p2 = [
            (Position, CropRegion::new(0.88, 0.97, 0.84, 0.97)),
            (Coins, CropRegion::new(0.556, 0.59, 0.92, 0.965)),
            (LapNum, CropRegion::new(0.621, 0.635, 0.925, 0.9635)),
            (RaceLaps, CropRegion::new(0.646, 0.661, 0.925, 0.9635)),
            (ItemSlot1, CropRegion::new(0.834, 0.918, 0.08, 0.23)),
            (ItemSlot2, CropRegion::new(0.915, 0.958, 0.047, 0.13)),
        ];
        let regions = p1
            .into_iter()
            .map(|(kind, region)| ((PlayerSlot::P1, kind), region))
            .chain(p2.into_iter().map(|(kind, region)| ((PlayerSlot::P2, kind), region)))
            .collect();
        Self { regions }
    }
}

impl RegionLayout {
    pub fn region(&self, slot: PlayerSlot, kind: StatKind) -> Option<CropRegion> {
        self.regions.get(&(slot, kind)).copied()
    }

    pub fn set(&mut self, slot: PlayerSlot, kind: StatKind, region: CropRegion) {
        self.regions.insert((slot, kind), region);
    }
}
