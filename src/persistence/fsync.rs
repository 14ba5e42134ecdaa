//! Low-level fsync operations for durability.
//!
//! Review records must survive a crash between iterations, so both file and
//! directory fsyncs are required: without fsync on the directory, a rename
//! may not survive a power loss even if the file contents were synced.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
///
/// After this returns, the file's contents are guaranteed to be on disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory to disk, ensuring directory entries are durable.
///
/// Required after creating or renaming a file: the directory entry itself
/// must be persisted for the file to survive a crash.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    // Open the directory as a file (read-only is sufficient for fsync)
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
