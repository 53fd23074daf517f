use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use firewatch::config;
use firewatch::db::Database;
use firewatch::pipeline::{Pipeline, RunOptions};

#[derive(Parser)]
#[command(name = "firewatch", version)]
#[command(about = "Wildfire smoke detection — camera polling, classification, alerting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the detection loop
    Run {
        /// File touched once per completed tick for liveness monitoring
        #[arg(long)]
        heartbeat: Option<PathBuf>,

        /// Save positive-scoring crops for future training
        #[arg(long)]
        collect_positives: bool,

        /// Subtract images taken this many minutes apart (0 = classify raw frames)
        #[arg(long, default_value_t = 0)]
        minus_minutes: u32,

        /// Only process cameras of this type
        #[arg(long)]
        restrict_type: Option<String>,

        /// Backfill start (RFC 3339); requires --end-time and --collect-positives
        #[arg(long)]
        start_time: Option<String>,

        /// Backfill end (RFC 3339)
        #[arg(long)]
        end_time: Option<String>,

        /// Log per-tick fetch/classify/post timings
        #[arg(long)]
        time: bool,
    },

    /// Show recent detections
    Recent {
        #[arg(short, long)]
        camera: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: u32,
        #[arg(long)]
        json: bool,
    },

    /// List active cameras
    Cameras {
        #[arg(long)]
        restrict_type: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("firewatch=info,warn")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config()?;

    match cli.command {
        Command::Run {
            heartbeat,
            collect_positives,
            minus_minutes,
            restrict_type,
            start_time,
            end_time,
            time,
        } => {
            let archive_range = parse_archive_range(start_time, end_time)?;
            let opts = RunOptions {
                heartbeat,
                collect_positives,
                minus_minutes,
                restrict_type,
                archive_range,
                log_timings: time,
            };
            Pipeline::new(cfg, opts).run()
        }

        Command::Recent { camera, limit, json } => {
            let db = Database::open(&cfg.database.path)?;
            let rows = db.recent_detections(camera.as_deref(), limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!(
                    "{:<5} {:<12} {:<12} {:<22} {:>6} {}",
                    "ID", "Timestamp", "Camera", "Box", "Score", "Image"
                );
                for row in rows {
                    println!(
                        "{:<5} {:<12} {:<12} {:<22} {:>5.2} {}",
                        row.id,
                        row.timestamp,
                        row.camera_id,
                        format!("{},{}..{},{}", row.min_x, row.min_y, row.max_x, row.max_y),
                        row.score,
                        row.image_id.as_deref().unwrap_or("-"),
                    );
                }
            }
            Ok(())
        }

        Command::Cameras { restrict_type } => {
            let db = Database::open(&cfg.database.path)?;
            for cam in db.get_active_cameras(restrict_type.as_deref())? {
                println!(
                    "{:<24} {:<12} {}",
                    cam.name,
                    cam.camera_type.as_deref().unwrap_or("-"),
                    cam.url
                );
            }
            Ok(())
        }
    }
}

/// Both bounds or neither; the range must be non-empty.
fn parse_archive_range(
    start: Option<String>,
    end: Option<String>,
) -> Result<Option<(i64, i64)>> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start_ts = chrono::DateTime::parse_from_rfc3339(&start)?.timestamp();
            let end_ts = chrono::DateTime::parse_from_rfc3339(&end)?.timestamp();
            if end_ts <= start_ts {
                bail!("--end-time must be after --start-time");
            }
            Ok(Some((start_ts, end_ts)))
        }
        _ => bail!("--start-time and --end-time must be given together"),
    }
}
