//! End-to-end exercise of the record/filter/alert stage: scores in, at most
//! one vetted detection out, suppression ledger honored, scratch files gone.

use image::RgbImage;

use firewatch::alerts::AlertManager;
use firewatch::config::{AlertConfig, StorageConfig};
use firewatch::db::Database;
use firewatch::history;
use firewatch::recorder::Recorder;
use firewatch::segmenter::Segment;

const TS: i64 = 1_700_000_000;

fn seg(min_x: i32, score: f64) -> Segment {
    Segment {
        min_x,
        min_y: 0,
        max_x: min_x + 100,
        max_y: 100,
        score,
        hist: None,
    }
}

fn write_frame(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    RgbImage::new(300, 200).save(&path).unwrap();
    path
}

fn recorder() -> Recorder {
    Recorder::new(&StorageConfig::default())
}

fn alert_manager() -> AlertManager {
    AlertManager::new(&AlertConfig::default(), None)
}

#[test]
fn fresh_camera_detection_recorded_and_cleaned_up() {
    let scratch = tempfile::TempDir::new().unwrap();
    let mut db = Database::open_in_memory().unwrap();
    let orig = write_frame(scratch.path(), "peak1__2023-11-14T12;00;00.jpg");

    // no history: the 0.92 segment clears with no stats attached
    recorder()
        .record_filter_report(
            &mut db,
            &alert_manager(),
            "peak1",
            TS,
            &orig,
            &orig,
            &[seg(0, 0.92), seg(100, 0.3)],
            0,
            false,
            false,
        )
        .unwrap();

    let detections = db.recent_detections(Some("peak1"), 10).unwrap();
    assert_eq!(detections.len(), 1);
    assert!((detections[0].score - 0.92).abs() < 1e-9);

    // alert ledger got its row
    assert!(db.recent_alert_exists("peak1", TS - 1).unwrap());

    // cleanup invariant: nothing from this tick survives in scratch
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn recurring_noise_box_is_filtered_but_scores_still_recorded() {
    let scratch = tempfile::TempDir::new().unwrap();
    let mut db = Database::open_in_memory().unwrap();

    // box 0 scored up to 0.75 at this time of day yesterday:
    // threshold = max(0.875, 0.95) = 0.95
    let sid = history::seconds_in_day(TS).unwrap();
    db.insert_scores("peak1", TS - 86_400, sid, 0, &[seg(0, 0.75)])
        .unwrap();

    let orig = write_frame(scratch.path(), "peak1__2023-11-14T12;05;00.jpg");
    recorder()
        .record_filter_report(
            &mut db,
            &alert_manager(),
            "peak1",
            TS,
            &orig,
            &orig,
            &[seg(0, 0.85)],
            0,
            false,
            false,
        )
        .unwrap();

    assert!(db.recent_detections(Some("peak1"), 10).unwrap().is_empty());
    assert!(!db.recent_alert_exists("peak1", 0).unwrap());
    // the 0.85 score row was still persisted for future filtering
    let hist = db
        .history_for("peak1", TS - 60, TS + 60, sid - 10, sid + 10)
        .unwrap();
    assert_eq!(hist.len(), 1);
    assert!((hist[0].max_score - 0.85).abs() < 1e-9);
    // cleanup ran even though no detection occurred
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn second_detection_within_cooldown_is_suppressed() {
    let scratch = tempfile::TempDir::new().unwrap();
    let mut db = Database::open_in_memory().unwrap();
    let rec = recorder();
    let alerts = alert_manager();

    for (name, ts) in [
        ("peak1__2023-11-14T12;00;00.jpg", TS),
        ("peak1__2023-11-14T12;10;00.jpg", TS + 600),
    ] {
        let orig = write_frame(scratch.path(), name);
        rec.record_filter_report(
            &mut db,
            &alerts,
            "peak1",
            ts,
            &orig,
            &orig,
            &[seg(0, 0.95)],
            0,
            false,
            false,
        )
        .unwrap();
    }

    // both detections persisted, but only the first produced an alert row
    assert_eq!(db.recent_detections(Some("peak1"), 10).unwrap().len(), 2);
    assert!(db.recent_alert_exists("peak1", TS - 1).unwrap());
    assert!(!db.recent_alert_exists("peak1", TS).unwrap());
}

#[test]
fn positives_only_mode_writes_crops_and_no_rows() {
    let scratch = tempfile::TempDir::new().unwrap();
    let positives = scratch.path().join("positives");
    let mut db = Database::open_in_memory().unwrap();

    let rec = Recorder::new(&StorageConfig {
        artifact_endpoint: None,
        positives_dir: Some(positives.to_string_lossy().into_owned()),
        archive_dir: None,
    });

    let orig = write_frame(scratch.path(), "peak1__2023-11-14T12;00;00.jpg");
    rec.record_filter_report(
        &mut db,
        &alert_manager(),
        "peak1",
        TS,
        &orig,
        &orig,
        &[seg(0, 0.9), seg(100, 0.2)],
        0,
        true, // positives only (archived backfill)
        true,
    )
    .unwrap();

    assert_eq!(std::fs::read_dir(&positives).unwrap().count(), 1);
    assert!(db.recent_detections(None, 10).unwrap().is_empty());
    let sid = history::seconds_in_day(TS).unwrap();
    assert!(db
        .history_for("peak1", TS - 60, TS + 60, sid - 10, sid + 10)
        .unwrap()
        .is_empty());
}
