//! Watch mode.
//!
//! Observes the local files a bundle's reference sets name, debounces
//! change bursts, and re-runs the caller's rebuild on every settled
//! change. With nothing local to observe the driver warns and degrades
//! to the single run that already happened. Ctrl-C stops the watchers
//! and returns cleanly.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use log::{debug, warn};
use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Run the watch loop. `rebuild` is invoked after each debounced change
/// burst and returns the new observation set (the reference set may have
/// changed with the edit); an empty return keeps the previous set.
pub fn watch_and_rerun(
    initial_files: Vec<PathBuf>,
    debounce: Duration,
    mut rebuild: impl FnMut() -> Vec<PathBuf> + Send,
) -> anyhow::Result<()> {
    if initial_files.is_empty() {
        warn!("nothing to watch: the bundle references no local files");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the watch event loop")?;

    runtime.block_on(async move {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| {
                if let Ok(event) = result {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            let _ = tx.send(path);
                        }
                    }
                }
            },
            NotifyConfig::default(),
        )
        .context("creating the file watcher")?;

        let mut watched = Vec::new();
        subscribe(&mut watcher, &mut watched, initial_files)?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    debug!("interrupt received, stopping watchers");
                    return Ok(());
                }
                changed = rx.recv() => {
                    let Some(first) = changed else { return Ok(()); };
                    // Coalesce the burst before rebuilding.
                    tokio::time::sleep(debounce).await;
                    let mut changes = vec![first];
                    while let Ok(more) = rx.try_recv() {
                        changes.push(more);
                    }
                    changes.sort();
                    changes.dedup();
                    debug!("change detected in {} file(s), re-running", changes.len());

                    // The rebuild runs blocking HTTP and its own event
                    // loops; keep it off the watch runtime's thread.
                    let next_files = std::thread::scope(|scope| {
                        scope
                            .spawn(&mut rebuild)
                            .join()
                            .expect("rebuild thread must not panic")
                    });
                    // An empty set means the rebuild failed or went fully
                    // remote; keep the previous subscriptions either way.
                    if !next_files.is_empty() {
                        subscribe(&mut watcher, &mut watched, next_files)?;
                    }
                }
            }
        }
    })
}

fn subscribe(
    watcher: &mut RecommendedWatcher,
    watched: &mut Vec<PathBuf>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    if *watched == files {
        return Ok(());
    }
    for path in watched.iter() {
        let _ = watcher.unwatch(path);
    }
    for path in &files {
        if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
            warn!("cannot watch {}: {e}", path.display());
        }
    }
    debug!("watching {} file(s)", files.len());
    *watched = files;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_watch_set_degrades_to_one_shot() {
        let mut calls = 0;
        watch_and_rerun(Vec::new(), Duration::from_millis(10), || {
            calls += 1;
            Vec::new()
        })
        .expect("empty set returns immediately");
        assert_eq!(calls, 0);
    }
}
