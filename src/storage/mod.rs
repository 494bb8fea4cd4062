//! Local peer storage
//!
//! Shared files, in-flight downloads, and the JSON state snapshot that
//! makes downloads resumable across restarts.

pub mod download;
pub mod local;

pub use download::{DownloadState, DownloadStatus};
pub use local::{LocalStore, SharedFile};
