//! Compact command implementation.

use super::{open_replica, open_store};
use crate::error::CliResult;
use replica_core::LocalStore;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug, PartialEq, Eq)]
pub struct CompactStats {
    /// Frames before compaction.
    pub frames_before: u64,
    /// Frames after compaction.
    pub frames_after: u64,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    println!("Compacting journal at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;

    println!("Compaction Analysis:");
    println!("  Frames before: {}", stats.frames_before);
    println!("  Frames after:  {}", stats.frames_after);
    println!("  Size before:   {} bytes", stats.bytes_before);
    if !dry_run {
        println!("  Size after:    {} bytes", stats.bytes_after);
        println!(
            "  Space saved:   {} bytes",
            stats.bytes_before.saturating_sub(stats.bytes_after)
        );
    }

    if !dry_run {
        println!();
        if stats.frames_after < stats.frames_before {
            println!("✓ Compaction complete");
        } else {
            println!("No compaction needed - journal is already optimal");
        }
    }

    Ok(())
}

/// Compacts the journal at `path`, or only measures it when `dry_run`.
///
/// A compacted journal holds one clear frame followed by one frame per
/// stored record.
pub fn compact(path: &Path, dry_run: bool) -> CliResult<CompactStats> {
    let dir = open_replica(path)?;
    let store = open_store(&dir)?;

    let frames_before = store.frame_count();
    let bytes_before = store.journal_size()?;
    let optimal = store.len()? as u64 + 1;

    if dry_run || frames_before <= optimal {
        return Ok(CompactStats {
            frames_before,
            frames_after: frames_before.min(optimal),
            bytes_before,
            bytes_after: bytes_before,
        });
    }

    store.compact()?;
    Ok(CompactStats {
        frames_before,
        frames_after: store.frame_count(),
        bytes_before,
        bytes_after: store.journal_size()?,
    })
}
