/// Image segmentation — splits one camera frame into overlapping square
/// tiles for batch classification.
///
/// Contract: the returned crop and box lists are parallel, equal length, and
/// non-empty for any decodable image.
use image::RgbImage;

use crate::config::SegmenterConfig;

/// One exact bounding box. History lookups match on all four coordinates,
/// which is why tiling must be deterministic for a given image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBox {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

/// Same-box score statistics from recent history, attached by the post-filter.
#[derive(Debug, Clone, Copy)]
pub struct HistStats {
    pub avg: f64,
    pub max: f64,
    pub samples: i64,
}

/// A scored segment. Produced by the classifier, enriched by the post-filter.
#[derive(Debug, Clone)]
pub struct Segment {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub score: f64,
    pub hist: Option<HistStats>,
}

impl Segment {
    pub fn matches(&self, min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> bool {
        self.min_x == min_x && self.min_y == min_y && self.max_x == max_x && self.max_y == max_y
    }
}

/// Cut the image into square tiles with 50% overlap. Tile edge is a fraction
/// of image height, floored at `min_tile_px` and clipped to the image.
pub fn segment_image(img: &RgbImage, cfg: &SegmenterConfig) -> (Vec<RgbImage>, Vec<SegmentBox>) {
    let (w, h) = img.dimensions();
    let tile = ((h as f32 * cfg.tile_height_fraction) as u32)
        .max(cfg.min_tile_px)
        .min(w)
        .min(h)
        .max(1);
    let stride = (tile / 2).max(1);

    let mut crops = Vec::new();
    let mut boxes = Vec::new();
    for y in axis_positions(h, tile, stride) {
        for x in axis_positions(w, tile, stride) {
            crops.push(image::imageops::crop_imm(img, x, y, tile, tile).to_image());
            boxes.push(SegmentBox {
                min_x: x as i32,
                min_y: y as i32,
                max_x: (x + tile) as i32,
                max_y: (y + tile) as i32,
            });
        }
    }
    (crops, boxes)
}

/// Tile origins along one axis: stride steps plus a final edge-aligned tile
/// so the full extent is covered.
fn axis_positions(extent: u32, tile: u32, stride: u32) -> Vec<u32> {
    let mut positions = Vec::new();
    let mut pos = 0;
    while pos + tile <= extent {
        positions.push(pos);
        pos += stride;
    }
    let last = extent - tile;
    if positions.last() != Some(&last) {
        positions.push(last);
    }
    positions
}
