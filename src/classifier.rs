//! Client for the external smoke prediction service.
//!
//! The service scores a batch of JPEG crops in one round trip. A service
//! error here is fatal: the process terminates and the external supervisor
//! restarts it, rather than silently skipping classification.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use image::RgbImage;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::segmenter::{Segment, SegmentBox};

#[derive(Debug, Deserialize)]
struct PredictResponse {
    scores: Vec<f64>,
}

pub struct SmokeClassifier {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl SmokeClassifier {
    pub fn connect(cfg: &ClassifierConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building prediction service client")?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
        })
    }

    /// Score one batch of crops. One score in 0..1 per crop, same order.
    pub fn classify_batch(&self, crops: &[RgbImage]) -> Result<Vec<f64>> {
        let instances: Vec<String> = crops
            .iter()
            .map(|crop| encode_jpeg(crop).map(|bytes| B64.encode(bytes)))
            .collect::<Result<_>>()?;

        let response: PredictResponse = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "instances": instances }))
            .send()
            .context("prediction service request failed")?
            .error_for_status()
            .context("prediction service returned error status")?
            .json()
            .context("prediction service returned malformed response")?;

        if response.scores.len() != crops.len() {
            bail!(
                "prediction service returned {} scores for {} crops",
                response.scores.len(),
                crops.len()
            );
        }
        debug!("classified batch of {} crops", crops.len());
        Ok(response.scores)
    }
}

fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Jpeg,
    )
    .context("encoding crop to JPEG")?;
    Ok(bytes)
}

/// Zip boxes with their scores and sort descending, the order the
/// post-filter expects.
pub fn attach_scores(boxes: &[SegmentBox], scores: &[f64]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = boxes
        .iter()
        .zip(scores)
        .map(|(b, &score)| Segment {
            min_x: b.min_x,
            min_y: b.min_y,
            max_x: b.max_x,
            max_y: b.max_y,
            score,
            hist: None,
        })
        .collect();
    segments.sort_by(|a, b| b.score.total_cmp(&a.score));
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes(n: i32) -> Vec<SegmentBox> {
        (0..n)
            .map(|i| SegmentBox {
                min_x: i * 100,
                min_y: 0,
                max_x: i * 100 + 100,
                max_y: 100,
            })
            .collect()
    }

    #[test]
    fn scores_sorted_descending() {
        let segments = attach_scores(&boxes(3), &[0.1, 0.92, 0.5]);
        let ordered: Vec<f64> = segments.iter().map(|s| s.score).collect();
        assert_eq!(ordered, vec![0.92, 0.5, 0.1]);
        // box identity follows its score
        assert_eq!(segments[0].min_x, 100);
    }

    #[test]
    fn segments_start_without_history() {
        let segments = attach_scores(&boxes(2), &[0.3, 0.4]);
        assert!(segments.iter().all(|s| s.hist.is_none()));
    }
}
