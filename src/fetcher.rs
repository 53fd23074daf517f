//! Image fetching and round-robin camera selection.
//!
//! Each call downloads the current frame of the next scheduled camera into
//! the scratch directory. Unchanged frames (same content hash as the
//! previous fetch) and network failures advance selection to the next
//! camera instead of surfacing, bounded by a skip budget so one tick can
//! never spin forever on a wall of stale cameras.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;

use crate::archive;
use crate::config::FetcherConfig;
use crate::db::Database;
use crate::error::FetchSkip;
use crate::registry::CameraRegistry;

#[derive(Debug)]
pub struct FetchedFrame {
    pub camera_id: String,
    pub timestamp: i64,
    pub path: PathBuf,
    pub md5: String,
}

pub struct ImageFetcher {
    http: reqwest::blocking::Client,
    max_skips: u32,
}

impl ImageFetcher {
    pub fn new(cfg: &FetcherConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building image fetch client")?;
        Ok(Self {
            http,
            max_skips: cfg.max_skips,
        })
    }

    /// Fetch the next image to check for smoke.
    ///
    /// With `specific` set the named camera is fetched exactly once and
    /// duplicates are surfaced to the caller (diff-mode resolution needs
    /// them); `Ok(None)` then means the download failed. Otherwise cameras
    /// are visited round-robin via the shared counter and `Ok(None)` means
    /// no camera produced a fresh frame within the skip budget.
    pub fn fetch_next(
        &self,
        db: &Database,
        registry: &mut CameraRegistry,
        scratch: &Path,
        specific: Option<&str>,
    ) -> Result<Option<FetchedFrame>> {
        for _ in 0..self.max_skips {
            let camera = match specific {
                Some(name) => registry
                    .find_mut(name)
                    .with_context(|| format!("camera {name} missing from registry"))?,
                None => {
                    let counter = db.next_sources_counter()?;
                    registry.at_counter_mut(counter)
                }
            };
            let camera_id = camera.name.clone();
            let timestamp = Utc::now().timestamp();
            // a same-camera refetch within one second must not clobber a
            // frame the deferred queue still references
            let path = archive::scratch_image_path(scratch, &camera_id, timestamp);

            let bytes = match self.download(&camera.url) {
                Ok(bytes) => bytes,
                Err(source) => {
                    warn!(
                        "{}",
                        FetchSkip::Network {
                            camera: camera_id,
                            source
                        }
                    );
                    if specific.is_some() {
                        return Ok(None);
                    }
                    continue;
                }
            };
            if let Err(source) = std::fs::write(&path, &bytes) {
                warn!(
                    "{}",
                    FetchSkip::Io {
                        camera: camera_id,
                        source
                    }
                );
                if specific.is_some() {
                    return Ok(None);
                }
                continue;
            }

            let md5 = format!("{:x}", md5::compute(&bytes));
            let duplicate = camera.last_md5.as_deref() == Some(md5.as_str());
            camera.last_md5 = Some(md5.clone());
            if duplicate && specific.is_none() {
                warn!("{}", FetchSkip::Duplicate { camera: camera_id });
                let _ = std::fs::remove_file(&path);
                continue;
            }

            return Ok(Some(FetchedFrame {
                camera_id,
                timestamp,
                path,
                md5,
            }));
        }
        warn!("no camera produced a fresh frame within {} skips", self.max_skips);
        Ok(None)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.http.get(url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}
