//! Recording stage: persists scores and detections, uploads detection
//! artifacts, collects positive crops for training, and unconditionally
//! cleans up the tick's transient files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::alerts::AlertManager;
use crate::config::StorageConfig;
use crate::db::Database;
use crate::history;
use crate::imagery;
use crate::segmenter::Segment;

/// Best-effort artifact upload. `upload` returns the store's identifier for
/// the file, or None on any failure — it never raises.
pub struct ArtifactStore {
    endpoint: Option<String>,
    http: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

impl ArtifactStore {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            http: reqwest::blocking::Client::new(),
        }
    }

    pub fn upload(&self, path: &Path) -> Option<String> {
        let endpoint = self.endpoint.as_ref()?;
        let attempt = || -> Result<String> {
            let form = reqwest::blocking::multipart::Form::new()
                .file("file", path)
                .with_context(|| format!("reading {}", path.display()))?;
            let response: UploadResponse = self
                .http
                .post(endpoint)
                .multipart(form)
                .send()?
                .error_for_status()?
                .json()?;
            Ok(response.id)
        };
        match attempt() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("artifact upload of {} failed: {e}", path.display());
                None
            }
        }
    }
}

pub struct Recorder {
    artifacts: ArtifactStore,
    positives_dir: Option<PathBuf>,
}

impl Recorder {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            artifacts: ArtifactStore::new(storage.artifact_endpoint.clone()),
            positives_dir: storage.positives_dir.as_ref().map(PathBuf::from),
        }
    }

    /// Record scores, run the post-filter, persist/alert on a confirmed
    /// candidate, then delete the tick's image files. Cleanup runs whether
    /// the tick detected anything or failed partway; persistence errors
    /// still propagate afterwards (fail-fast).
    #[allow(clippy::too_many_arguments)]
    pub fn record_filter_report(
        &self,
        db: &mut Database,
        alert_manager: &AlertManager,
        camera_id: &str,
        timestamp: i64,
        classify_path: &Path,
        orig_path: &Path,
        segments: &[Segment],
        minus_minutes: u32,
        positives_only: bool,
        collect_positives: bool,
    ) -> Result<()> {
        if collect_positives {
            if let Err(e) = self.collect_positives(orig_path, segments) {
                warn!("collecting positive crops failed: {e}");
            }
        }

        let mut annotated: Option<PathBuf> = None;
        let result = if positives_only {
            Ok(())
        } else {
            self.persist_and_alert(
                db,
                alert_manager,
                camera_id,
                timestamp,
                orig_path,
                segments,
                minus_minutes,
                &mut annotated,
            )
        };

        delete_image_files(classify_path, orig_path, annotated.as_deref());

        if let Some(top) = segments.first() {
            info!("highest score for camera {camera_id}: {:.4}", top.score);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_and_alert(
        &self,
        db: &mut Database,
        alert_manager: &AlertManager,
        camera_id: &str,
        timestamp: i64,
        orig_path: &Path,
        segments: &[Segment],
        minus_minutes: u32,
        annotated: &mut Option<PathBuf>,
    ) -> Result<()> {
        let sid = history::seconds_in_day(timestamp)?;
        db.insert_scores(camera_id, timestamp, sid, minus_minutes, segments)?;

        let Some(fire) = history::post_filter(db, camera_id, timestamp, segments)? else {
            return Ok(());
        };
        info!(
            "fire detected by camera {camera_id}, image {}, score {:.4}",
            orig_path.display(),
            fire.score
        );

        let annotated_path = imagery::draw_fire_box(orig_path, &fire)?;
        *annotated = Some(annotated_path.clone());

        let mut artifact_ids = Vec::new();
        for path in [orig_path, annotated_path.as_path()] {
            if let Some(id) = self.artifacts.upload(path) {
                artifact_ids.push(id);
            }
        }
        let image_id = artifact_ids.first().map(String::as_str);

        db.insert_detection(camera_id, timestamp, &fire, image_id)?;
        if alert_manager.check_and_update(db, camera_id, timestamp, image_id)? {
            alert_manager.alert_fire(
                db,
                camera_id,
                timestamp,
                orig_path,
                &annotated_path,
                &fire,
            );
        }
        Ok(())
    }

    /// Copy the original-image crop of every positive-scoring segment into
    /// the positives directory for future training runs.
    fn collect_positives(&self, orig_path: &Path, segments: &[Segment]) -> Result<()> {
        let Some(dir) = &self.positives_dir else {
            return Ok(());
        };
        let positives: Vec<&Segment> = segments.iter().filter(|s| s.score > 0.5).collect();
        if positives.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(dir)?;

        let img = image::open(orig_path)
            .with_context(|| format!("opening {} for crops", orig_path.display()))?
            .to_rgb8();
        let stem = orig_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        for seg in &positives {
            let w = (seg.max_x - seg.min_x).max(1) as u32;
            let h = (seg.max_y - seg.min_y).max(1) as u32;
            let crop =
                image::imageops::crop_imm(&img, seg.min_x.max(0) as u32, seg.min_y.max(0) as u32, w, h)
                    .to_image();
            let name = format!(
                "{stem}_Crop_{}x{}x{}x{}.jpg",
                seg.min_x, seg.min_y, seg.max_x, seg.max_y
            );
            crop.save(dir.join(name))?;
        }
        info!(
            "found {} positives in image {}",
            positives.len(),
            orig_path.display()
        );
        Ok(())
    }
}

/// Remove the tick's transient files. Best-effort: a missing file is not a
/// reason to stop the loop.
pub fn delete_image_files(classify_path: &Path, orig_path: &Path, annotated: Option<&Path>) {
    let mut targets = vec![classify_path];
    if orig_path != classify_path {
        targets.push(orig_path);
    }
    if let Some(a) = annotated {
        targets.push(a);
    }
    for path in targets {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("could not delete {}: {e}", path.display());
        }
    }
}

/// Liveness signal for the external monitor: refresh the heartbeat file
/// once per completed tick.
pub fn heartbeat(path: &Path) {
    if let Err(e) = std::fs::write(path, chrono::Utc::now().timestamp().to_string()) {
        warn!("heartbeat touch failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn seg(min_x: i32, score: f64) -> Segment {
        Segment {
            min_x,
            min_y: 0,
            max_x: min_x + 50,
            max_y: 50,
            score,
            hist: None,
        }
    }

    #[test]
    fn positive_crops_written_for_scores_above_half() {
        let dir = tempfile::TempDir::new().unwrap();
        let positives = dir.path().join("positives");
        let img_path = dir.path().join("peak1__2023-11-14T12;00;00.jpg");
        RgbImage::new(200, 100).save(&img_path).unwrap();

        let recorder = Recorder::new(&StorageConfig {
            artifact_endpoint: None,
            positives_dir: Some(positives.to_string_lossy().into_owned()),
            archive_dir: None,
        });
        recorder
            .collect_positives(&img_path, &[seg(0, 0.9), seg(50, 0.51), seg(100, 0.5)])
            .unwrap();

        let written: Vec<_> = std::fs::read_dir(&positives).unwrap().collect();
        assert_eq!(written.len(), 2);
    }

    #[test]
    fn cleanup_removes_all_tick_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let orig = dir.path().join("orig.jpg");
        let diff = dir.path().join("diff.jpg");
        let annotated = dir.path().join("orig_Score.jpg");
        for p in [&orig, &diff, &annotated] {
            std::fs::write(p, b"x").unwrap();
        }

        delete_image_files(&diff, &orig, Some(&annotated));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn cleanup_handles_shared_path_and_missing_annotation() {
        let dir = tempfile::TempDir::new().unwrap();
        let orig = dir.path().join("orig.jpg");
        std::fs::write(&orig, b"x").unwrap();

        // non-diff mode: classify path IS the original; no annotation
        delete_image_files(&orig, &orig, None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn heartbeat_touches_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let hb = dir.path().join("alive");
        heartbeat(&hb);
        assert!(hb.exists());
    }
}
