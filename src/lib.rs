pub mod alerts;
pub mod archive;
pub mod classifier;
pub mod config;
pub mod db;
pub mod deferred;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod imagery;
pub mod notifier;
pub mod pipeline;
pub mod recorder;
pub mod registry;
pub mod segmenter;
pub mod tracker;
