//! Download engine
//!
//! Coordinates a pool of workers that pull chunk tasks off a shared
//! queue, fetch them from scored peers over direct TCP or the relay,
//! verify every byte, and persist chunks until the file assembles.

pub mod downloader;
pub mod stats;

pub use downloader::{ChunkTask, Downloader};
pub use stats::DownloadStats;
