//! Notification transport: email through the system MTA (`sendmail`, with
//! `msmtp` as fallback) and SMS through an HTTP gateway. Both are
//! best-effort; delivery failures are logged by the caller and never stop
//! the detection loop.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde_json::json;
use tracing::warn;

use crate::config::AlertConfig;

pub struct Notifier {
    from_address: String,
    sms_gateway_url: Option<String>,
    http: reqwest::blocking::Client,
}

impl Notifier {
    pub fn new(cfg: &AlertConfig) -> Self {
        Self {
            from_address: cfg.from_address.clone(),
            sms_gateway_url: cfg.sms_gateway_url.clone(),
            http: reqwest::blocking::Client::new(),
        }
    }

    pub fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        attachments: &[PathBuf],
    ) -> Result<()> {
        let message = build_mime(&self.from_address, recipients, subject, body, attachments)?;
        pipe_to_mta(&message)
    }

    pub fn send_sms(&self, phone: &str, message: &str) -> Result<()> {
        let Some(url) = &self.sms_gateway_url else {
            bail!("no SMS gateway configured");
        };
        self.http
            .post(url)
            .json(&json!({ "to": phone, "message": message }))
            .send()
            .context("SMS gateway request failed")?
            .error_for_status()
            .context("SMS gateway returned error status")?;
        Ok(())
    }
}

fn pipe_to_mta(message: &str) -> Result<()> {
    for mta in ["sendmail", "msmtp"] {
        let spawned = Command::new(mta)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("{mta} not available: {e}");
                continue;
            }
        };
        child
            .stdin
            .take()
            .context("no stdin handle for MTA")?
            .write_all(message.as_bytes())?;
        let status = child.wait()?;
        if status.success() {
            return Ok(());
        }
        warn!("{mta} exited with {status}");
    }
    bail!("no working MTA found (tried sendmail, msmtp)")
}

fn build_mime(
    from: &str,
    recipients: &[String],
    subject: &str,
    body: &str,
    attachments: &[PathBuf],
) -> Result<String> {
    let boundary = format!("firewatch-boundary-{}", chrono::Utc::now().timestamp_millis());
    let mut message = String::new();
    message.push_str(&format!("From: {from}\r\n"));
    message.push_str(&format!("To: {}\r\n", recipients.join(", ")));
    message.push_str(&format!("Subject: {subject}\r\n"));
    message.push_str("MIME-Version: 1.0\r\n");

    if attachments.is_empty() {
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
        message.push_str(body);
        return Ok(message);
    }

    message.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    ));
    message.push_str(&format!("--{boundary}\r\n"));
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
    message.push_str(body);
    message.push_str("\r\n");

    for path in attachments {
        if !path.exists() {
            warn!("attachment not found: {}", path.display());
            continue;
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading attachment {}", path.display()))?;
        let filename = file_name_or(path, "attachment.jpg");

        message.push_str(&format!("--{boundary}\r\n"));
        message.push_str(&format!("Content-Type: image/jpeg; name=\"{filename}\"\r\n"));
        message.push_str("Content-Transfer-Encoding: base64\r\n");
        message.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{filename}\"\r\n\r\n"
        ));
        let encoded = B64.encode(&bytes);
        for chunk in encoded.as_bytes().chunks(76) {
            message.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            message.push_str("\r\n");
        }
    }
    message.push_str(&format!("--{boundary}--\r\n"));
    Ok(message)
}

fn file_name_or(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| fallback.to_string())
}
