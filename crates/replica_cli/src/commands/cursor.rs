//! Cursor commands.

use super::open_replica;
use crate::error::CliResult;
use replica_sync::{FileSyncCursor, SyncCursor};
use std::path::Path;

/// Lists every stored cursor.
pub fn show(path: &Path) -> CliResult<()> {
    let dir = open_replica(path)?;
    let cursors = FileSyncCursor::open(&dir.cursor_path())?.all();

    if cursors.is_empty() {
        println!("No cursors stored");
    }
    for (collection, at) in cursors {
        println!("{collection}: {at}");
    }
    Ok(())
}

/// Forgets the cursor of one collection.
pub fn reset(path: &Path, collection: &str) -> CliResult<()> {
    let dir = open_replica(path)?;
    let cursor = FileSyncCursor::open(&dir.cursor_path())?;

    let previous = cursor.get(collection)?;
    cursor.reset(collection)?;
    tracing::info!(collection, %previous, "cursor reset");
    println!("✓ Cursor for '{collection}' reset (was {previous})");
    Ok(())
}
