//! Filesystem ingress.
//!
//! Subscribes to one directory (non-recursive) through `notify`. Files
//! already there at start-up are ignored. A new file is handed to the
//! session only after its size stopped changing between two checks and at
//! least `settle_ms` has passed since it was first seen, so half-written
//! captures are never classified. A periodic rescan picks up anything the
//! event stream missed and forgets files that are gone, so a name that is
//! deleted and used again is classified again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use walkdir::WalkDir;

use triage_config::WatchConfig;
use triage_types::SessionState;
use triage_worker::{SessionManager, SubmitError};

use crate::{sys_debug, sys_error, sys_info, sys_warn};

/// Rescans happen every this many poll intervals while events flow.
const RESCAN_FACTOR: u32 = 10;

/// Size of a sighting that has not been measured yet.
const UNMEASURED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
struct Sighting {
    first_seen: Instant,
    size: u64,
}

/// Identity of a handled file, used to tell a late event for it from a
/// new file under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Why [`DirectoryWatcher::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchExit {
    /// The shutdown flag was raised.
    Shutdown,
    /// The session stopped accepting work.
    SessionStopped,
    /// Restart attempts were exhausted.
    SessionFailed(String),
}

pub struct DirectoryWatcher {
    dir: PathBuf,
    extensions: Vec<String>,
    settle: Duration,
    poll_interval: Duration,
    /// Files already handled, or present at start-up.
    seen: HashMap<PathBuf, Option<FileStamp>>,
    pending: HashMap<PathBuf, Sighting>,
    /// `None` when no watcher could be set up; rescans then do all the work.
    events: Option<Receiver<Event>>,
    _watcher: Option<RecommendedWatcher>,
}

impl DirectoryWatcher {
    /// Create the directory if needed, subscribe to it, and snapshot what
    /// is already there.
    pub fn new(config: &WatchConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.dir)?;

        let (watcher, events) = match subscribe(&config.dir) {
            Ok((watcher, events)) => (Some(watcher), Some(events)),
            Err(e) => {
                sys_warn!(
                    "[WATCH] Cannot subscribe to {}: {e}; falling back to rescans",
                    config.dir.display()
                );
                (None, None)
            }
        };

        let mut watcher = Self {
            dir: config.dir.clone(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            settle: config.settle(),
            poll_interval: config.poll_interval(),
            seen: HashMap::new(),
            pending: HashMap::new(),
            events,
            _watcher: watcher,
        };
        watcher.seen = watcher
            .list_images()
            .into_keys()
            .map(|path| {
                let stamp = FileStamp::of(&path);
                (path, stamp)
            })
            .collect();
        sys_info!(
            "[WATCH] Watching {} ({} existing file(s) ignored)",
            watcher.dir.display(),
            watcher.seen.len()
        );
        Ok(watcher)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Apply queued events, rescan the directory, and return files that
    /// became ready, oldest sighting first.
    pub fn poll_once(&mut self, now: Instant) -> Vec<PathBuf> {
        self.step(now, true)
    }

    fn step(&mut self, now: Instant, rescan: bool) -> Vec<PathBuf> {
        let queued: Vec<Event> = self
            .events
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        for event in queued {
            self.apply(event, now);
        }
        if rescan {
            self.rescan(now);
        }
        self.collect_ready(now)
    }

    fn apply(&mut self, event: Event, now: Instant) {
        for path in event.paths {
            if !self.is_image(&path) {
                continue;
            }
            match event.kind {
                EventKind::Remove(_) => self.forget(&path),
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => {
                    if !path.is_file() {
                        self.forget(&path);
                        continue;
                    }
                    let current = FileStamp::of(&path);
                    match self.seen.get(&path) {
                        // Late event for a file already handled.
                        Some(stamp) if *stamp == current => {}
                        _ => {
                            self.seen.remove(&path);
                            self.track(path, now);
                        }
                    }
                }
                EventKind::Modify(_) if !self.seen.contains_key(&path) => {
                    self.track(path, now);
                }
                _ => {}
            }
        }
    }

    /// Pick up files no event announced and forget files that are gone.
    fn rescan(&mut self, now: Instant) {
        let listing = self.list_images();
        self.seen.retain(|path, _| listing.contains_key(path));
        self.pending.retain(|path, _| listing.contains_key(path));
        for path in listing.into_keys() {
            if !self.seen.contains_key(&path) {
                self.track(path, now);
            }
        }
    }

    fn collect_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready = Vec::new();
        let mut vanished = Vec::new();
        for (path, sighting) in self.pending.iter_mut() {
            let size = match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    vanished.push(path.clone());
                    continue;
                }
            };
            if sighting.size != size {
                sighting.size = size;
            } else if now.saturating_duration_since(sighting.first_seen) >= self.settle {
                ready.push((sighting.first_seen, path.clone()));
            }
        }
        for path in vanished {
            self.pending.remove(&path);
        }

        ready.sort();
        ready
            .into_iter()
            .map(|(_, path)| {
                self.pending.remove(&path);
                self.seen.insert(path.clone(), FileStamp::of(&path));
                path
            })
            .collect()
    }

    fn track(&mut self, path: PathBuf, now: Instant) {
        self.pending.entry(path).or_insert_with_key(|path| {
            sys_debug!("[WATCH] New file {}", path.display());
            Sighting {
                first_seen: now,
                size: UNMEASURED,
            }
        });
    }

    fn forget(&mut self, path: &Path) {
        self.seen.remove(path);
        self.pending.remove(path);
    }

    /// Put a ready file back so a later check offers it again.
    fn retry_later(&mut self, path: PathBuf, now: Instant) {
        self.seen.remove(&path);
        self.pending.insert(
            path,
            Sighting {
                first_seen: now,
                size: UNMEASURED,
            },
        );
    }

    /// Block until an event arrives or `bound` passes.
    fn wait_for_events(&mut self, bound: Duration) {
        let Some(rx) = self.events.as_ref() else {
            std::thread::sleep(bound);
            return;
        };
        match rx.recv_timeout(bound) {
            Ok(event) => self.apply(event, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                sys_warn!("[WATCH] Event stream closed; falling back to rescans");
                self.events = None;
            }
        }
    }

    /// Watch and submit until shutdown or until the session stops
    /// accepting work. Outcomes are logged by the session manager.
    pub fn run(&mut self, session: &SessionManager, shutdown: &AtomicBool) -> WatchExit {
        let mut last_rescan = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            if session.state() == SessionState::Failed {
                return WatchExit::SessionFailed(failure_reason(session));
            }

            self.wait_for_events(self.poll_interval);

            let now = Instant::now();
            let rescan_every = if self.events.is_some() {
                self.poll_interval * RESCAN_FACTOR
            } else {
                self.poll_interval
            };
            let rescan = now.saturating_duration_since(last_rescan) >= rescan_every;
            if rescan {
                last_rescan = now;
            }

            for path in self.step(now, rescan) {
                match session.submit_detached(&path) {
                    Ok(id) => sys_info!("[WATCH] Queued {} as request #{id}", path.display()),
                    Err(SubmitError::QueueFull { capacity }) => {
                        sys_warn!(
                            "[WATCH] Queue full ({capacity}); will retry {}",
                            path.display()
                        );
                        self.retry_later(path, now);
                    }
                    Err(SubmitError::Unavailable(reason)) => {
                        sys_error!("[WATCH] Session unavailable: {reason}");
                        return WatchExit::SessionFailed(reason);
                    }
                    Err(SubmitError::Stopped) => return WatchExit::SessionStopped,
                }
            }
        }
        WatchExit::Shutdown
    }

    fn list_images(&self) -> HashMap<PathBuf, u64> {
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    sys_warn!("[WATCH] {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.is_image(entry.path()))
            .filter_map(|entry| {
                let size = entry.metadata().ok()?.len();
                Some((entry.into_path(), size))
            })
            .collect()
    }
}

/// Forward create, modify and remove events for `dir` into a channel.
fn subscribe(dir: &Path) -> notify::Result<(RecommendedWatcher, Receiver<Event>)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                let _ = tx.send(event);
            }
            _ => {}
        },
        Err(e) => sys_warn!("[WATCH] Watch error: {e}"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

fn failure_reason(session: &SessionManager) -> String {
    session
        .status()
        .last_error
        .unwrap_or_else(|| "worker restart attempts exhausted".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn watcher(dir: &Path, settle_ms: u64) -> DirectoryWatcher {
        DirectoryWatcher::new(&WatchConfig {
            dir: dir.to_path_buf(),
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            settle_ms,
            poll_ms: 10,
        })
        .unwrap()
    }

    #[test]
    fn test_existing_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.jpg"), b"old").unwrap();

        let mut w = watcher(dir.path(), 0);
        let t0 = Instant::now();
        assert!(w.poll_once(t0).is_empty());
        assert!(w.poll_once(t0 + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_new_file_waits_for_settle() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 1000);
        let t0 = Instant::now();

        let img = dir.path().join("capture_1.jpg");
        fs::write(&img, b"jpegdata").unwrap();

        assert!(w.poll_once(t0).is_empty(), "first sighting");
        assert!(w.poll_once(t0 + Duration::from_millis(500)).is_empty(), "too early");
        assert_eq!(w.poll_once(t0 + Duration::from_millis(1000)), vec![img]);
        assert!(w.poll_once(t0 + Duration::from_secs(3)).is_empty(), "emitted once");
    }

    #[test]
    fn test_growing_file_is_held_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 0);
        let t0 = Instant::now();

        let img = dir.path().join("growing.png");
        fs::write(&img, b"part").unwrap();
        assert!(w.poll_once(t0).is_empty());

        fs::write(&img, b"partial-and-more").unwrap();
        assert!(w.poll_once(t0 + Duration::from_millis(10)).is_empty());

        assert_eq!(w.poll_once(t0 + Duration::from_millis(20)), vec![img]);
    }

    #[test]
    fn test_only_image_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 0);
        let t0 = Instant::now();

        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("UPPER.JPG"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        w.poll_once(t0);
        let ready = w.poll_once(t0 + Duration::from_millis(1));
        assert_eq!(ready, vec![dir.path().join("UPPER.JPG")]);
    }

    #[test]
    fn test_vanished_file_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 0);
        let t0 = Instant::now();

        let img = dir.path().join("gone.jpg");
        fs::write(&img, b"x").unwrap();
        w.poll_once(t0);
        fs::remove_file(&img).unwrap();

        assert!(w.poll_once(t0 + Duration::from_millis(1)).is_empty());
        assert!(w.pending.is_empty());
    }

    #[test]
    fn test_ready_files_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 100);
        let t0 = Instant::now();

        fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        w.poll_once(t0);
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        w.poll_once(t0 + Duration::from_millis(50));

        let ready = w.poll_once(t0 + Duration::from_millis(200));
        assert_eq!(
            ready,
            vec![dir.path().join("b.jpg"), dir.path().join("a.jpg")]
        );
    }

    #[test]
    fn test_retry_later_offers_file_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 0);
        let t0 = Instant::now();

        let img = dir.path().join("retry.jpg");
        fs::write(&img, b"x").unwrap();
        w.poll_once(t0);
        let ready = w.poll_once(t0 + Duration::from_millis(1));
        assert_eq!(ready, vec![img.clone()]);

        w.retry_later(img.clone(), t0 + Duration::from_millis(1));
        assert!(w.poll_once(t0 + Duration::from_millis(2)).is_empty());
        assert_eq!(w.poll_once(t0 + Duration::from_millis(3)), vec![img]);
    }

    /// Step with real time until something is ready or five seconds pass.
    fn ready_within(w: &mut DirectoryWatcher, rescan: bool) -> Vec<PathBuf> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let ready = w.step(Instant::now(), rescan);
            if !ready.is_empty() {
                return ready;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Vec::new()
    }

    #[test]
    fn test_recreated_file_is_emitted_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 0);
        let img = dir.path().join("capture.jpg");

        fs::write(&img, b"first").unwrap();
        assert_eq!(ready_within(&mut w, true), vec![img.clone()]);

        fs::remove_file(&img).unwrap();
        let t = Instant::now();
        assert!(w.poll_once(t).is_empty());
        assert!(!w.seen.contains_key(&img), "deleted file forgotten");

        fs::write(&img, b"second").unwrap();
        assert_eq!(ready_within(&mut w, true), vec![img]);
    }

    #[test]
    fn test_replaced_file_between_checks_is_emitted_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 0);
        let img = dir.path().join("capture.jpg");

        fs::write(&img, b"first").unwrap();
        assert_eq!(ready_within(&mut w, true), vec![img.clone()]);

        // No check in between: only the remove and create events tell.
        fs::remove_file(&img).unwrap();
        fs::write(&img, b"second image").unwrap();
        assert_eq!(ready_within(&mut w, false), vec![img.clone()]);
        assert!(ready_within_ms(&mut w, 300).is_empty(), "emitted once");
    }

    #[test]
    fn test_events_announce_new_files_without_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), 0);
        assert!(w.events.is_some());

        let img = dir.path().join("event.png");
        fs::write(&img, b"png").unwrap();
        assert_eq!(ready_within(&mut w, false), vec![img.clone()]);
        assert!(ready_within_ms(&mut w, 300).is_empty(), "late events ignored");
    }

    fn ready_within_ms(w: &mut DirectoryWatcher, ms: u64) -> Vec<PathBuf> {
        let deadline = Instant::now() + Duration::from_millis(ms);
        let mut ready = Vec::new();
        while Instant::now() < deadline {
            ready.extend(w.step(Instant::now(), true));
            std::thread::sleep(Duration::from_millis(20));
        }
        ready
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("captured_images");
        let w = watcher(&target, 0);
        assert!(target.is_dir());
        assert_eq!(w.dir(), target.as_path());
    }
}
