//! Put command implementation.

use confsync_engine::{push_tree, PushOptions};
use confsync_store::KvStore;
use std::path::PathBuf;

/// Runs the put command, printing one line per changed key.
pub async fn run(
    store: &dyn KvStore,
    prefix: &str,
    directory: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = PushOptions::new(prefix);
    if let Some(directory) = directory {
        options = options.with_root(directory);
    }

    let report = push_tree(store, &options).await?;
    for line in report.lines() {
        println!("{line}");
    }
    Ok(())
}
