//! Alert suppression and dispatch.
//!
//! The `alerts` table doubles as the suppression ledger: a new alert for a
//! camera is withheld while any ledger row for the same camera is younger
//! than the cool-down window. Dispatch goes out over email (with recent
//! archive frames attached for temporal context) and SMS.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::config::AlertConfig;
use crate::db::Database;
use crate::notifier::Notifier;
use crate::segmenter::Segment;

/// Alert emails attach same-camera frames from this window before the
/// detection so reviewers can judge the smoke's progression.
const CONTEXT_START_SECS: i64 = 3 * 60;
const CONTEXT_END_SECS: i64 = 60;
const CONTEXT_MAX_FRAMES: usize = 3;

pub struct AlertManager {
    suppress_secs: i64,
    notifier: Notifier,
    archive: Option<Archive>,
}

impl AlertManager {
    pub fn new(cfg: &AlertConfig, archive: Option<Archive>) -> Self {
        Self {
            suppress_secs: cfg.suppress_secs,
            notifier: Notifier::new(cfg),
            archive,
        }
    }

    /// Record the alert in the ledger unless one for this camera is still
    /// inside the cool-down window. Returns true when a new alert was
    /// recorded and should be dispatched.
    pub fn check_and_update(
        &self,
        db: &Database,
        camera_id: &str,
        timestamp: i64,
        image_id: Option<&str>,
    ) -> Result<bool> {
        if db.recent_alert_exists(camera_id, timestamp - self.suppress_secs)? {
            warn!("suppressing new alert for {camera_id} due to recent alert");
            return Ok(false);
        }
        db.insert_alert(camera_id, timestamp, image_id)?;
        Ok(true)
    }

    /// Send the fire alert through all channels. Transport failures are
    /// logged; the detection itself is already persisted.
    pub fn alert_fire(
        &self,
        db: &Database,
        camera_id: &str,
        timestamp: i64,
        img_path: &Path,
        annotated_path: &Path,
        segment: &Segment,
    ) {
        self.email_notification(db, camera_id, timestamp, img_path, annotated_path, segment);
        self.sms_notification(db, camera_id);
    }

    fn email_notification(
        &self,
        db: &Database,
        camera_id: &str,
        timestamp: i64,
        img_path: &Path,
        annotated_path: &Path,
        segment: &Segment,
    ) {
        let recipients = match db.notification_emails() {
            Ok(r) => r,
            Err(e) => {
                warn!("could not load email recipients: {e}");
                return;
            }
        };
        if recipients.is_empty() {
            return;
        }

        let mut attachments = self.context_frames(camera_id, timestamp);
        attachments.push(img_path.to_path_buf());
        attachments.push(annotated_path.to_path_buf());

        let subject = alert_subject(camera_id, segment.score);
        let body = "Please check the attached images for fire.";
        match self
            .notifier
            .send_email(&recipients, &subject, body, &attachments)
        {
            Ok(()) => info!("alert email sent to {} recipients", recipients.len()),
            Err(e) => warn!("alert email failed: {e}"),
        }
    }

    fn sms_notification(&self, db: &Database, camera_id: &str) {
        let phones = match db.notification_phones() {
            Ok(p) => p,
            Err(e) => {
                warn!("could not load SMS recipients: {e}");
                return;
            }
        };
        let message =
            format!("Firewatch fire notification in camera {camera_id}. Please check email for details");
        for phone in phones {
            if let Err(e) = self.notifier.send_sms(&phone, &message) {
                warn!("SMS to {phone} failed: {e}");
            }
        }
    }

    fn context_frames(&self, camera_id: &str, timestamp: i64) -> Vec<PathBuf> {
        let Some(archive) = &self.archive else {
            return Vec::new();
        };
        match archive.images_in_range(
            camera_id,
            timestamp - CONTEXT_START_SECS,
            timestamp - CONTEXT_END_SECS,
        ) {
            Ok(frames) => frames
                .into_iter()
                .take(CONTEXT_MAX_FRAMES)
                .map(|(_, path)| path)
                .collect(),
            Err(e) => {
                warn!("archive lookup for alert context failed: {e}");
                Vec::new()
            }
        }
    }
}

fn alert_subject(camera_id: &str, score: f64) -> String {
    format!(
        "Possible ({}%) fire in camera {camera_id}",
        (score * 100.0) as i32
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;

    fn manager() -> AlertManager {
        AlertManager::new(&AlertConfig::default(), None)
    }

    #[test]
    fn second_alert_inside_window_is_suppressed() {
        let db = Database::open_in_memory().unwrap();
        let m = manager();
        let t = 1_700_000_000;
        assert!(m.check_and_update(&db, "peak1", t, None).unwrap());
        assert!(!m.check_and_update(&db, "peak1", t + 7_199, None).unwrap());
        // suppression writes no ledger entry, so the original alert still governs
        assert!(m.check_and_update(&db, "peak1", t + 7_201, None).unwrap());
    }

    #[test]
    fn suppression_is_per_camera() {
        let db = Database::open_in_memory().unwrap();
        let m = manager();
        let t = 1_700_000_000;
        assert!(m.check_and_update(&db, "peak1", t, None).unwrap());
        assert!(m.check_and_update(&db, "peak2", t, None).unwrap());
    }

    #[test]
    fn subject_carries_percent_score() {
        assert_eq!(
            alert_subject("peak1", 0.92),
            "Possible (92%) fire in camera peak1"
        );
    }
}
