//! The detection loop.
//!
//! Single-threaded and blocking by design: one camera's full
//! fetch → segment → classify → filter → record pipeline runs to completion
//! per tick. Camera refresh cadence is seconds to minutes, far above
//! per-tick latency, so there is nothing to win by overlapping ticks.
//!
//! Three operating modes share the tail of the tick:
//!   - live polling (round-robin over active cameras),
//!   - diff mode (paired captures `minus_minutes` apart, subtracted),
//!   - archived backfill (random samples from a local archive; positives
//!     collection only, no scores/detections/alerts).

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::alerts::AlertManager;
use crate::archive::{self, Archive};
use crate::classifier::{self, SmokeClassifier};
use crate::config::AppConfig;
use crate::db::Database;
use crate::deferred::{DeferredEntry, DeferredQueue};
use crate::fetcher::ImageFetcher;
use crate::imagery;
use crate::recorder::{self, Recorder};
use crate::registry::CameraRegistry;
use crate::segmenter;
use crate::tracker::TimeTracker;

/// Pause between ticks that produced nothing to classify. Camera refresh
/// cadence is seconds at minimum, so waiting loses no frames.
const IDLE_PAUSE: std::time::Duration = std::time::Duration::from_secs(1);

/// Knobs from the `run` subcommand, distinct from file/env configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub heartbeat: Option<PathBuf>,
    pub collect_positives: bool,
    /// Non-zero enables diff mode.
    pub minus_minutes: u32,
    pub restrict_type: Option<String>,
    /// Backfill window (epoch seconds), mutually exclusive with live polling.
    pub archive_range: Option<(i64, i64)>,
    pub log_timings: bool,
}

/// One image ready for classification. In diff mode `classify_path` is the
/// difference image and `orig_path` the second capture; otherwise they are
/// the same file.
struct TickImage {
    camera_id: String,
    timestamp: i64,
    classify_path: PathBuf,
    orig_path: PathBuf,
}

pub struct Pipeline {
    cfg: AppConfig,
    opts: RunOptions,
}

impl Pipeline {
    pub fn new(cfg: AppConfig, opts: RunOptions) -> Self {
        Self { cfg, opts }
    }

    /// Run the detection loop until externally terminated. Classification
    /// and persistence failures propagate out of here and end the process;
    /// the supervisor owns restarts.
    pub fn run(self) -> Result<()> {
        let cfg = &self.cfg;
        let opts = &self.opts;

        if opts.archive_range.is_some() && !opts.collect_positives {
            bail!("archived backfill requires --collect-positives");
        }

        let mut db = Database::open(&cfg.database.path)?;
        let mut registry = CameraRegistry::load(&db, opts.restrict_type.as_deref())?;
        let fetcher = ImageFetcher::new(&cfg.fetcher)?;
        let classifier = SmokeClassifier::connect(&cfg.classifier)?;
        let recorder = Recorder::new(&cfg.storage);
        let alert_manager = AlertManager::new(
            &cfg.alerts,
            cfg.storage.archive_dir.as_ref().map(Archive::new),
        );
        let backfill_archive = cfg.storage.archive_dir.as_ref().map(Archive::new);

        // Process-scoped scratch directory; dropped (and wiped) on exit.
        let scratch = tempfile::TempDir::new().context("creating scratch directory")?;
        info!("scratch directory {}", scratch.path().display());
        info!(
            "monitoring {} cameras (diff mode: {})",
            registry.len(),
            opts.minus_minutes
        );

        let mut tracker = TimeTracker::new();
        let mut deferred = DeferredQueue::new(opts.minus_minutes);

        loop {
            let tick_start = Instant::now();

            let tick = if let Some((start_ts, end_ts)) = opts.archive_range {
                let archive = backfill_archive
                    .as_ref()
                    .context("backfill mode requires storage.archive_dir")?;
                archived_tick(
                    archive,
                    &registry,
                    scratch.path(),
                    opts.minus_minutes,
                    start_ts,
                    end_ts,
                )?
            } else if opts.minus_minutes > 0 {
                diff_tick(
                    &db,
                    &mut registry,
                    &fetcher,
                    scratch.path(),
                    &mut deferred,
                    &tracker,
                    opts.minus_minutes,
                )?
            } else {
                fetcher
                    .fetch_next(&db, &mut registry, scratch.path(), None)?
                    .map(|frame| TickImage {
                        camera_id: frame.camera_id,
                        timestamp: frame.timestamp,
                        classify_path: frame.path.clone(),
                        orig_path: frame.path,
                    })
            };

            // queue maintenance only, or nothing fetchable: pause briefly so
            // a wall of stale cameras doesn't spin the loop
            let Some(tick) = tick else {
                std::thread::sleep(IDLE_PAUSE);
                continue;
            };

            let img = image::open(&tick.classify_path)
                .with_context(|| format!("decoding {}", tick.classify_path.display()))?
                .to_rgb8();
            let (crops, boxes) = segmenter::segment_image(&img, &cfg.segmenter);
            let time_fetch = tick_start.elapsed();

            // a classification-service error is fatal by design
            let scores = classifier.classify_batch(&crops)?;
            let segments = classifier::attach_scores(&boxes, &scores);
            let time_classify = tick_start.elapsed();

            recorder.record_filter_report(
                &mut db,
                &alert_manager,
                &tick.camera_id,
                tick.timestamp,
                &tick.classify_path,
                &tick.orig_path,
                &segments,
                opts.minus_minutes,
                opts.archive_range.is_some(),
                opts.collect_positives,
            )?;
            if let Some(hb) = &opts.heartbeat {
                recorder::heartbeat(hb);
            }

            let total = tick_start.elapsed();
            tracker.record(total.as_secs_f64());
            if opts.log_timings {
                info!(
                    "timings: fetch={:.2}s classify={:.2}s post={:.2}s",
                    time_fetch.as_secs_f64(),
                    (time_classify - time_fetch).as_secs_f64(),
                    (total - time_classify).as_secs_f64()
                );
            }
        }
    }
}

/// One diff-mode tick: queue maintenance plus, when an entry is ready and
/// its camera has a changed frame, a difference image to classify.
fn diff_tick(
    db: &Database,
    registry: &mut CameraRegistry,
    fetcher: &ImageFetcher,
    scratch: &Path,
    deferred: &mut DeferredQueue,
    tracker: &TimeTracker,
    minus_minutes: u32,
) -> Result<Option<TickImage>> {
    let now = Utc::now().timestamp();
    let queue_full = deferred.is_full(tracker.time_per_sample());
    let ready = deferred.pop_ready(now, tracker.time_per_sample());

    if !queue_full {
        enqueue_deferred(db, registry, fetcher, scratch, deferred)?;
    }
    match ready {
        Some(entry) => resolve_deferred(db, registry, fetcher, scratch, deferred, entry, minus_minutes),
        None => Ok(None),
    }
}

/// Fetch a fresh frame and queue it for later pairing, unless its camera is
/// already waiting.
fn enqueue_deferred(
    db: &Database,
    registry: &mut CameraRegistry,
    fetcher: &ImageFetcher,
    scratch: &Path,
    deferred: &mut DeferredQueue,
) -> Result<()> {
    let Some(frame) = fetcher.fetch_next(db, registry, scratch, None)? else {
        return Ok(());
    };
    let rejected = deferred.push(DeferredEntry {
        camera_id: frame.camera_id,
        timestamp: frame.timestamp,
        path: frame.path,
        md5: frame.md5,
        old_wait_secs: 0,
    });
    if let Some(rejected) = rejected {
        warn!("camera {} already waiting in deferred queue", rejected.camera_id);
        let _ = std::fs::remove_file(&rejected.path);
        // take a nap to let the queue catch up
        std::thread::sleep(std::time::Duration::from_secs(2));
        return Ok(());
    }
    info!("deferred queue length {}", deferred.len());
    Ok(())
}

/// Refetch the entry's camera. Unchanged frames requeue the entry until its
/// bounded retry window runs out; a changed frame produces the difference
/// image and consumes the entry.
fn resolve_deferred(
    db: &Database,
    registry: &mut CameraRegistry,
    fetcher: &ImageFetcher,
    scratch: &Path,
    deferred: &mut DeferredQueue,
    entry: DeferredEntry,
    minus_minutes: u32,
) -> Result<Option<TickImage>> {
    let Some(frame) = fetcher.fetch_next(db, registry, scratch, Some(&entry.camera_id))? else {
        // download failed: requeue so the entry gets another chance, still
        // bounded by the retry budget
        let now = Utc::now().timestamp();
        let elapsed = now - entry.timestamp;
        if deferred.past_retry_budget(&entry, elapsed) {
            let _ = std::fs::remove_file(&entry.path);
        } else if let Some(rejected) = deferred.requeue(entry, now, elapsed) {
            let _ = std::fs::remove_file(&rejected.path);
        }
        return Ok(None);
    };

    let elapsed = frame.timestamp - entry.timestamp;
    if frame.md5 == entry.md5 {
        info!(
            "camera {} unchanged (old_wait={}s, diff={}s)",
            entry.camera_id, entry.old_wait_secs, elapsed
        );
        if deferred.past_retry_budget(&entry, elapsed) {
            // timeout waiting for a new image from this camera
            let _ = std::fs::remove_file(&entry.path);
        } else if let Some(rejected) = deferred.requeue(entry, frame.timestamp, elapsed) {
            let _ = std::fs::remove_file(&rejected.path);
        }
        let _ = std::fs::remove_file(&frame.path);
        return Ok(None);
    }

    let current = image::open(&frame.path)
        .with_context(|| format!("decoding {}", frame.path.display()))?
        .to_rgb8();
    let earlier = image::open(&entry.path)
        .with_context(|| format!("decoding {}", entry.path.display()))?
        .to_rgb8();
    let diff = imagery::diff_images(&current, &earlier)?;
    let diff_path = scratch.join(archive::diff_name(
        &frame.camera_id,
        frame.timestamp,
        minus_minutes,
    ));
    diff.save(&diff_path)
        .with_context(|| format!("saving diff image {}", diff_path.display()))?;
    let _ = std::fs::remove_file(&entry.path);

    info!(
        "checking camera {} (queue length {}, gap {}s)",
        frame.camera_id,
        deferred.len(),
        elapsed
    );
    Ok(Some(TickImage {
        camera_id: frame.camera_id,
        timestamp: frame.timestamp,
        classify_path: diff_path,
        orig_path: frame.path,
    }))
}

/// One backfill tick: a random camera and a random instant inside the
/// requested range, served from the local archive. Frames are copied into
/// the scratch directory so the normal cleanup never touches archive files.
fn archived_tick(
    archive: &Archive,
    registry: &CameraRegistry,
    scratch: &Path,
    minus_minutes: u32,
    start_ts: i64,
    end_ts: i64,
) -> Result<Option<TickImage>> {
    let mut rng = rand::thread_rng();
    let cameras = registry.cameras();
    let camera_id = &cameras[rng.gen_range(0..cameras.len())].name;
    let ts = rng.gen_range(start_ts..=end_ts);
    let window_secs = 60 * i64::from(minus_minutes.max(1));

    let frames = archive.images_in_range(camera_id, ts - window_secs, ts)?;
    if minus_minutes > 0 {
        let (Some((earlier_ts, earlier_src)), Some((current_ts, current_src))) =
            (frames.first(), frames.last())
        else {
            return Ok(None);
        };
        if earlier_ts >= current_ts {
            return Ok(None); // need two distinct captures to subtract
        }
        let current_path = copy_into(scratch, current_src)?;
        let earlier = image::open(earlier_src)?.to_rgb8();
        let current = image::open(&current_path)?.to_rgb8();
        let diff = imagery::diff_images(&current, &earlier)?;
        let diff_path = scratch.join(archive::diff_name(camera_id, *current_ts, minus_minutes));
        diff.save(&diff_path)?;
        Ok(Some(TickImage {
            camera_id: camera_id.clone(),
            timestamp: *current_ts,
            classify_path: diff_path,
            orig_path: current_path,
        }))
    } else {
        let Some((frame_ts, src)) = frames.last() else {
            return Ok(None);
        };
        let path = copy_into(scratch, src)?;
        Ok(Some(TickImage {
            camera_id: camera_id.clone(),
            timestamp: *frame_ts,
            classify_path: path.clone(),
            orig_path: path,
        }))
    }
}

fn copy_into(scratch: &Path, src: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .with_context(|| format!("archive path {} has no file name", src.display()))?;
    let dest = scratch.join(name);
    std::fs::copy(src, &dest)
        .with_context(|| format!("copying {} into scratch", src.display()))?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tick_pause_is_short_but_nonzero() {
        assert!(!IDLE_PAUSE.is_zero());
        assert!(IDLE_PAUSE <= std::time::Duration::from_secs(5));
    }

    #[test]
    fn backfill_without_positives_collection_is_refused() {
        let cfg = AppConfig {
            fetcher: Default::default(),
            classifier: Default::default(),
            segmenter: Default::default(),
            database: Default::default(),
            storage: Default::default(),
            alerts: Default::default(),
        };
        let opts = RunOptions {
            heartbeat: None,
            collect_positives: false,
            minus_minutes: 0,
            restrict_type: None,
            archive_range: Some((0, 100)),
            log_timings: false,
        };
        assert!(Pipeline::new(cfg, opts).run().is_err());
    }
}
