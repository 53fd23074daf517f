//! Archival image naming and lookup.
//!
//! Camera frames are stored with the capture time encoded in the filename:
//! `{camera}__{YYYY-MM-DD}T{HH;MM;SS}.jpg`. Difference images append a
//! `_Diff{minutes}` suffix and annotated images a `_Score` suffix; both are
//! skipped when scanning, since only raw frames are classification input.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use tracing::debug;

use crate::error::ArchiveError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H;%M;%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub camera_id: String,
    pub timestamp: i64,
}

pub fn image_name(camera_id: &str, timestamp: i64) -> String {
    let dt = Local
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Local::now);
    format!("{camera_id}__{}.jpg", dt.format(TIMESTAMP_FORMAT))
}

pub fn image_path(dir: &Path, camera_id: &str, timestamp: i64) -> PathBuf {
    dir.join(image_name(camera_id, timestamp))
}

/// Scratch path for a freshly fetched frame. Capture timestamps have whole-
/// second resolution, so a refetch of the same camera within one second gets
/// a numbered variant instead of overwriting the file already on disk.
pub fn scratch_image_path(dir: &Path, camera_id: &str, timestamp: i64) -> PathBuf {
    let base = image_path(dir, camera_id, timestamp);
    if !base.exists() {
        return base;
    }
    let name = image_name(camera_id, timestamp);
    let stem = name.trim_end_matches(".jpg");
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{n}.jpg"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

pub fn diff_name(camera_id: &str, timestamp: i64, minus_minutes: u32) -> String {
    let base = image_name(camera_id, timestamp);
    let stem = base.trim_end_matches(".jpg");
    format!("{stem}_Diff{minus_minutes}.jpg")
}

/// Parse `{camera}__{timestamp}.jpg`. Derived images (`_Score`, `_Diff`) and
/// anything else that doesn't follow the naming scheme are rejected.
pub fn parse_name(file_name: &str) -> Result<ParsedName, ArchiveError> {
    let unparseable = || ArchiveError::UnparseableFilename(PathBuf::from(file_name));

    let stem = file_name.strip_suffix(".jpg").ok_or_else(unparseable)?;
    if stem.contains("_Score") || stem.contains("_Diff") {
        return Err(unparseable());
    }
    let (camera_id, ts_part) = stem.rsplit_once("__").ok_or_else(unparseable)?;
    if camera_id.is_empty() {
        return Err(unparseable());
    }
    let naive =
        NaiveDateTime::parse_from_str(ts_part, TIMESTAMP_FORMAT).map_err(|_| unparseable())?;
    let timestamp = Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(unparseable)?
        .timestamp();
    Ok(ParsedName {
        camera_id: camera_id.to_string(),
        timestamp,
    })
}

/// A directory of archived camera frames.
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Raw frames for one camera within `[start_ts, end_ts]`, ascending by
    /// capture time. Files with malformed names are skipped, not errors.
    pub fn images_in_range(
        &self,
        camera_id: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<(i64, PathBuf)>> {
        let mut found = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading archive dir {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let parsed = match parse_name(&name.to_string_lossy()) {
                Ok(p) => p,
                Err(e) => {
                    debug!("skipping archive entry: {e}");
                    continue;
                }
            };
            if parsed.camera_id == camera_id
                && parsed.timestamp >= start_ts
                && parsed.timestamp <= end_ts
            {
                found.push((parsed.timestamp, entry.path()));
            }
        }
        found.sort_by_key(|(ts, _)| *ts);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        let ts = 1_700_000_000;
        let name = image_name("big-peak-n", ts);
        let parsed = parse_name(&name).unwrap();
        assert_eq!(parsed.camera_id, "big-peak-n");
        assert_eq!(parsed.timestamp, ts);
    }

    #[test]
    fn camera_names_with_double_underscore_parse_on_last_separator() {
        let ts = 1_700_000_000;
        let name = image_name("site__cam2", ts);
        let parsed = parse_name(&name).unwrap();
        assert_eq!(parsed.camera_id, "site__cam2");
    }

    #[test]
    fn derived_and_malformed_names_rejected() {
        assert!(parse_name("peak1__2023-11-14T12;00;00_Score.jpg").is_err());
        assert!(parse_name("peak1__2023-11-14T12;00;00_Diff1.jpg").is_err());
        assert!(parse_name("notes.txt").is_err());
        assert!(parse_name("peak1.jpg").is_err());
        assert!(parse_name("peak1__garbage.jpg").is_err());
    }

    #[test]
    fn scratch_path_never_reuses_an_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let ts = 1_700_000_000;
        let first = scratch_image_path(dir.path(), "peak1", ts);
        std::fs::write(&first, b"a").unwrap();
        let second = scratch_image_path(dir.path(), "peak1", ts);
        assert_ne!(first, second);
        std::fs::write(&second, b"b").unwrap();
        let third = scratch_image_path(dir.path(), "peak1", ts);
        assert_ne!(third, first);
        assert_ne!(third, second);
    }

    #[test]
    fn range_scan_filters_camera_and_window() {
        let dir = tempfile::TempDir::new().unwrap();
        let base = 1_700_000_000;
        for (cam, ts) in [
            ("peak1", base),
            ("peak1", base + 60),
            ("peak1", base + 600),
            ("peak2", base + 30),
        ] {
            std::fs::write(image_path(dir.path(), cam, ts), b"jpg").unwrap();
        }
        std::fs::write(dir.path().join("README"), b"not an image").unwrap();

        let archive = Archive::new(dir.path());
        let hits = archive.images_in_range("peak1", base, base + 120).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].0 < hits[1].0);
    }
}
