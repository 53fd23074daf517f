use std::path::PathBuf;

use thiserror::Error;

/// Reasons a single fetch attempt is abandoned and camera selection moves on.
///
/// These are the only locally-recovered failures in the pipeline: the fetch
/// loop logs them and advances to the next scheduled camera. Everything
/// downstream of a successful fetch (classification, SQL) propagates as
/// `anyhow::Error` and terminates the process.
#[derive(Debug, Error)]
pub enum FetchSkip {
    #[error("error fetching image from {camera}: {source}")]
    Network {
        camera: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error writing image for {camera}: {source}")]
    Io {
        camera: String,
        #[source]
        source: std::io::Error,
    },

    /// Content hash unchanged since the previous fetch. Not an error.
    #[error("camera {camera} image unchanged")]
    Duplicate { camera: String },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unparseable archive filename: {0}")]
    UnparseableFilename(PathBuf),
}
