// External crates
use anyhow::{Context, Result};
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{CreateKind, ModifyKind, RemoveKind},
};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use tokio::sync::mpsc;

/// Filesystem activity on the tailed log file, coalesced to what the
/// pipeline cares about. All variants are treated as wake-up nudges; the
/// tailer re-stats the file itself to decide what actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Created,
    Modified,
    Removed,
}

/// Translate a notify event into zero or more [`WatchEvent`]s for the file
/// named `target` inside the watched directory.
fn translate_event(event: &Event, target: &OsStr) -> Vec<WatchEvent> {
    if !event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(target))
    {
        return Vec::new();
    }

    match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => vec![WatchEvent::Created],
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => vec![WatchEvent::Modified],
        // A rename in either direction changes which inode the path names.
        EventKind::Modify(ModifyKind::Name(_)) => vec![WatchEvent::Removed],
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => vec![WatchEvent::Removed],
        _ => Vec::new(),
    }
}

/// Watch the directory containing `log_file` and stream [`WatchEvent`]s for
/// that file. The returned watcher must be kept alive for events to flow;
/// dropping it silently stops the stream.
pub fn watch_log_file(
    log_file: &Path,
) -> Result<(RecommendedWatcher, mpsc::Receiver<WatchEvent>)> {
    let dir = match log_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let target: OsString = log_file
        .file_name()
        .context("log_file has no file name component")?
        .to_os_string();

    let (tx, rx) = mpsc::channel(64);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                for watch_event in translate_event(&event, &target) {
                    // Nudges are coalescable; dropping one on a full
                    // channel loses nothing the poll fallback won't catch.
                    let _ = tx.try_send(watch_event);
                }
            }
        },
        notify::Config::default(),
    )?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch log directory {:?}", dir))?;

    Ok((watcher, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, RenameMode};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        let mut e = Event::new(kind);
        e.paths.push(PathBuf::from(path));
        e
    }

    #[test]
    fn data_change_on_target_is_modified() {
        let e = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/var/game/client.log",
        );
        assert_eq!(
            translate_event(&e, OsStr::new("client.log")),
            vec![WatchEvent::Modified]
        );
    }

    #[test]
    fn events_on_other_files_are_ignored() {
        let e = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/var/game/other.log",
        );
        assert!(translate_event(&e, OsStr::new("client.log")).is_empty());
    }

    #[test]
    fn rename_counts_as_removal() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            "/var/game/client.log",
        );
        assert_eq!(
            translate_event(&e, OsStr::new("client.log")),
            vec![WatchEvent::Removed]
        );
    }

    #[test]
    fn creation_is_reported() {
        let e = event(
            EventKind::Create(CreateKind::File),
            "/var/game/client.log",
        );
        assert_eq!(
            translate_event(&e, OsStr::new("client.log")),
            vec![WatchEvent::Created]
        );
    }

    #[tokio::test]
    async fn watching_a_real_directory_delivers_nudges() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("client.log");

        let (_watcher, mut rx) = watch_log_file(&log_file).unwrap();
        std::fs::write(&log_file, "hello\n").unwrap();

        // Creation plus possibly a data-change event; either proves flow.
        let nudge = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event within 5s");
        assert!(nudge.is_some());
    }
}
