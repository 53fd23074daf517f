/// Image helpers: motion-difference subtraction and detection-box annotation.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::segmenter::Segment;

/// Subtract two grayscale frames with a mid-gray offset so negative values
/// survive: `out = 128 + a/2 - b/2`. Unchanged regions come out flat 128,
/// leaving only moving smoke for the classifier.
pub fn diff_images(current: &RgbImage, earlier: &RgbImage) -> Result<GrayImage> {
    if current.dimensions() != earlier.dimensions() {
        bail!(
            "image dimensions differ: {:?} vs {:?}",
            current.dimensions(),
            earlier.dimensions()
        );
    }
    let a = image::imageops::grayscale(current);
    let b = image::imageops::grayscale(earlier);
    let (w, h) = a.dimensions();
    let mut out = GrayImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let av = i32::from(a.get_pixel(x, y)[0]);
        let bv = i32::from(b.get_pixel(x, y)[0]);
        let v = 128 + av / 2 - bv / 2;
        *pixel = Luma([v.clamp(0, 255) as u8]);
    }
    Ok(out)
}

const BOX_LINE_WIDTH: i32 = 3;

/// Draw a red box around the fire segment and store the result next to the
/// original with a `_Score` suffix. Returns the annotated file's path.
pub fn draw_fire_box(img_path: &Path, segment: &Segment) -> Result<PathBuf> {
    let mut img = image::open(img_path)
        .with_context(|| format!("opening {} for annotation", img_path.display()))?
        .to_rgb8();

    let red = Rgb([255u8, 0, 0]);
    for i in 0..BOX_LINE_WIDTH {
        let width = segment.max_x - segment.min_x - 2 * i;
        let height = segment.max_y - segment.min_y - 2 * i;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect =
            Rect::at(segment.min_x + i, segment.min_y + i).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(&mut img, rect, red);
    }

    let annotated = annotated_path(img_path);
    img.save(&annotated)
        .with_context(|| format!("saving annotated image {}", annotated.display()))?;
    Ok(annotated)
}

fn annotated_path(img_path: &Path) -> PathBuf {
    let stem = img_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = img_path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jpg".to_string());
    img_path.with_file_name(format!("{stem}_Score.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_frames_diff_to_flat_gray() {
        let mut img = RgbImage::new(32, 32);
        for p in img.pixels_mut() {
            *p = Rgb([200, 100, 50]);
        }
        let diff = diff_images(&img, &img).unwrap();
        assert!(diff.pixels().all(|p| p[0] == 128));
    }

    #[test]
    fn brighter_region_diffs_above_gray() {
        let dark = RgbImage::new(16, 16);
        let mut bright = RgbImage::new(16, 16);
        for p in bright.pixels_mut() {
            *p = Rgb([255, 255, 255]);
        }
        let diff = diff_images(&bright, &dark).unwrap();
        assert!(diff.pixels().all(|p| p[0] > 128));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = RgbImage::new(16, 16);
        let b = RgbImage::new(16, 8);
        assert!(diff_images(&a, &b).is_err());
    }

    #[test]
    fn annotation_written_with_score_suffix() {
        let dir = tempfile::TempDir::new().unwrap();
        let img_path = dir.path().join("peak1__2023-11-14T12;00;00.jpg");
        RgbImage::new(200, 200).save(&img_path).unwrap();

        let segment = Segment {
            min_x: 40,
            min_y: 40,
            max_x: 120,
            max_y: 120,
            score: 0.9,
            hist: None,
        };
        let annotated = draw_fire_box(&img_path, &segment).unwrap();
        assert!(annotated
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("_Score"));
        let img = image::open(&annotated).unwrap().to_rgb8();
        // JPEG softens edges, so allow slack around pure red
        let border = img.get_pixel(41, 80);
        assert!(border[0] > 150 && border[1] < 100 && border[2] < 100);
    }
}
