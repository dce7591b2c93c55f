//! Root dispatcher: discovers hotfolders under the configured roots and keeps
//! exactly one worker thread per folder.
//!
//! The worker registry is the only state shared across discovery cycles; every
//! start and retirement happens under its single lock. Retiring a worker only
//! raises its flag, so an in-flight cycle always finishes.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::core::config::Config;
use crate::core::errors::{HfwError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::hotfolder::items::is_reserved_name;
use crate::hotfolder::metadata::MetadataWriter;
use crate::hotfolder::worker::{
    CycleOutcome, FolderWorker, WorkerContext, WorkerExit, WorkerFlags,
};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

/// A hotfolder found during discovery, paired with its output directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredFolder {
    pub folder: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub started: Vec<PathBuf>,
    pub retired: Vec<PathBuf>,
    pub missing_roots: Vec<PathBuf>,
    /// Folders left for a later round because their retired worker is still running.
    pub deferred: Vec<PathBuf>,
    /// Folders whose worker could not be started this round.
    pub failed: Vec<(PathBuf, String)>,
}

/// Registry entry for a running worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    pub folder: PathBuf,
    pub output_dir: PathBuf,
    retire: Arc<AtomicBool>,
    join: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    fn retire(&self) {
        self.retire.store(true, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<PathBuf, WorkerHandle>,
    /// Flagged workers that may still be finishing a cycle.
    retiring: Vec<WorkerHandle>,
}

impl Registry {
    fn is_retiring(&self, folder: &Path) -> bool {
        self.retiring
            .iter()
            .any(|handle| handle.folder == folder && !handle.is_finished())
    }

    /// Join threads that already ended. Returns folders whose active worker exited.
    fn reap(&mut self) -> Vec<(PathBuf, WorkerExit)> {
        let finished: Vec<PathBuf> = self
            .active
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(folder, _)| folder.clone())
            .collect();
        let mut exits = Vec::new();
        for folder in finished {
            if let Some(handle) = self.active.remove(&folder) {
                let exit = handle.join.join().unwrap_or(WorkerExit::Shutdown);
                exits.push((folder, exit));
            }
        }
        let (done, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.retiring).into_iter().partition(WorkerHandle::is_finished);
        for handle in done {
            let _ = handle.join.join();
        }
        self.retiring = pending;
        exits
    }
}

/// Result of a single synchronous pass over every folder (`hfw once`).
#[derive(Debug)]
pub struct OncePass {
    pub missing_roots: Vec<PathBuf>,
    pub outcomes: Vec<(PathBuf, Result<CycleOutcome>)>,
}

pub struct Dispatcher {
    config: Arc<RwLock<Config>>,
    logger: ActivityLoggerHandle,
    metadata: Arc<dyn MetadataWriter>,
    shutdown: Arc<AtomicBool>,
    registry: Mutex<Registry>,
    started_at: Instant,
}

impl Dispatcher {
    /// Build a dispatcher. At least one hotfolder root must be configured.
    pub fn new(
        config: Config,
        logger: ActivityLoggerHandle,
        metadata: Arc<dyn MetadataWriter>,
    ) -> Result<Self> {
        config.require_roots()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            logger,
            metadata,
            shutdown: Arc::new(AtomicBool::new(false)),
            registry: Mutex::new(Registry::default()),
            started_at: Instant::now(),
        })
    }

    /// Shared configuration handle (replaced wholesale on reload).
    pub fn config(&self) -> Arc<RwLock<Config>> {
        Arc::clone(&self.config)
    }

    /// Folders that currently have an active worker, sorted.
    pub fn watched_folders(&self) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = self.registry.lock().active.keys().cloned().collect();
        folders.sort();
        folders
    }

    /// One discovery round: start workers for new folders, retire vanished ones.
    pub fn discover_once(&self) -> DiscoveryReport {
        let config = self.config.read().clone();
        let mut report = DiscoveryReport::default();
        let found = discover_folders(&config, &mut report.missing_roots);
        for root in &report.missing_roots {
            self.logger.send(ActivityEvent::Warning {
                folder: None,
                message: format!("hotfolder root {} is missing; skipped", root.display()),
            });
        }

        let mut registry = self.registry.lock();
        for (folder, exit) in registry.reap() {
            if exit == WorkerExit::StoreUnavailable {
                report
                    .failed
                    .push((folder, "state store unavailable".to_string()));
            }
        }

        let wanted: HashSet<&Path> = found.iter().map(|d| d.folder.as_path()).collect();
        let stale: Vec<PathBuf> = registry
            .active
            .keys()
            .filter(|folder| !wanted.contains(folder.as_path()))
            .cloned()
            .collect();
        for folder in stale {
            if let Some(handle) = registry.active.remove(&folder) {
                handle.retire();
                registry.retiring.push(handle);
                report.retired.push(folder);
            }
        }

        for discovered in found {
            if registry.active.contains_key(&discovered.folder) {
                continue;
            }
            if registry.is_retiring(&discovered.folder) {
                report.deferred.push(discovered.folder);
                continue;
            }
            match self.spawn_worker(&discovered) {
                Ok(handle) => {
                    self.logger.send(ActivityEvent::WorkerStarted {
                        folder: discovered.folder.clone(),
                        output: discovered.output_dir.clone(),
                    });
                    report.started.push(discovered.folder.clone());
                    registry.active.insert(discovered.folder, handle);
                }
                Err(err) => {
                    self.logger.send(ActivityEvent::Error {
                        code: err.code().to_string(),
                        message: format!(
                            "cannot start worker for {}: {err}",
                            discovered.folder.display()
                        ),
                    });
                    report.failed.push((discovered.folder, err.to_string()));
                }
            }
        }
        report
    }

    fn spawn_worker(&self, discovered: &DiscoveredFolder) -> Result<WorkerHandle> {
        fs::create_dir_all(&discovered.output_dir)
            .map_err(|e| HfwError::io(&discovered.output_dir, e))?;

        let ctx = WorkerContext {
            folder: discovered.folder.clone(),
            output_dir: discovered.output_dir.clone(),
            config: Arc::clone(&self.config),
            logger: self.logger.clone(),
            metadata: Arc::clone(&self.metadata),
        };
        let flags = WorkerFlags {
            shutdown: Arc::clone(&self.shutdown),
            retire: Arc::new(AtomicBool::new(false)),
        };
        let retire = Arc::clone(&flags.retire);
        let name = discovered
            .folder
            .file_name()
            .map_or_else(|| "folder".to_string(), |n| n.to_string_lossy().into_owned());

        let join = thread::Builder::new()
            .name(format!("hfw-{name}"))
            .spawn(move || {
                let logger = ctx.logger.clone();
                let folder = ctx.folder.clone();
                match FolderWorker::open(ctx) {
                    Ok(worker) => worker.run(&flags),
                    Err(err) => {
                        logger.send(ActivityEvent::Error {
                            code: err.code().to_string(),
                            message: format!("state store for {}: {err}", folder.display()),
                        });
                        logger.send(ActivityEvent::WorkerStopped {
                            folder,
                            reason: "state store unavailable".to_string(),
                        });
                        WorkerExit::StoreUnavailable
                    }
                }
            })
            .map_err(|e| HfwError::Runtime {
                details: format!("failed to spawn worker thread for {name}: {e}"),
            })?;

        Ok(WorkerHandle {
            folder: discovered.folder.clone(),
            output_dir: discovered.output_dir.clone(),
            retire,
            join,
        })
    }

    /// Run one cycle for every discovered folder on the calling thread.
    pub fn cycle_all_once(&self) -> OncePass {
        let config = self.config.read().clone();
        let mut missing_roots = Vec::new();
        let found = discover_folders(&config, &mut missing_roots);
        let outcomes = found
            .into_iter()
            .map(|discovered| {
                let folder = discovered.folder.clone();
                let outcome = fs::create_dir_all(&discovered.output_dir)
                    .map_err(|e| HfwError::io(&discovered.output_dir, e))
                    .and_then(|()| {
                        FolderWorker::open(WorkerContext {
                            folder: discovered.folder,
                            output_dir: discovered.output_dir,
                            config: Arc::clone(&self.config),
                            logger: self.logger.clone(),
                            metadata: Arc::clone(&self.metadata),
                        })
                    })
                    .map(|mut worker| worker.run_cycle());
                (folder, outcome)
            })
            .collect();
        OncePass {
            missing_roots,
            outcomes,
        }
    }

    /// Replace the shared configuration by re-reading its file.
    pub fn reload(&self) -> Result<bool> {
        let path = self.config.read().paths.config_file.clone();
        let fresh = Config::load(Some(&path))?;
        fresh.require_roots()?;
        let old_hash = self.config.read().stable_hash()?;
        let new_hash = fresh.stable_hash()?;
        if old_hash == new_hash {
            return Ok(false);
        }
        *self.config.write() = fresh;
        self.logger.send(ActivityEvent::ConfigReloaded {
            details: format!("config hash: {old_hash} -> {new_hash}"),
        });
        Ok(true)
    }

    /// Stop every worker and wait up to `timeout` for them to exit.
    ///
    /// Returns the number of workers still running when the timeout expired.
    pub fn shutdown(&self, timeout: Duration) -> usize {
        self.shutdown.store(true, Ordering::Relaxed);
        let mut handles: Vec<WorkerHandle> = {
            let mut registry = self.registry.lock();
            let mut all: Vec<WorkerHandle> = registry.active.drain().map(|(_, h)| h).collect();
            all.append(&mut registry.retiring);
            all
        };

        let deadline = Instant::now().checked_add(timeout);
        while handles.iter().any(|h| !h.is_finished())
            && deadline.is_none_or(|deadline| Instant::now() < deadline)
        {
            thread::sleep(Duration::from_millis(50));
        }
        let (done, stuck): (Vec<_>, Vec<_>) = handles.drain(..).partition(WorkerHandle::is_finished);
        for handle in done {
            let _ = handle.join.join();
        }
        for handle in &stuck {
            self.logger.send(ActivityEvent::Warning {
                folder: Some(handle.folder.clone()),
                message: "worker did not stop before the shutdown timeout".to_string(),
            });
        }
        stuck.len()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Daemon loop: rediscover on the configured interval, honour reload and
    /// rediscovery requests, refresh the heartbeat, and stop on shutdown.
    #[cfg(feature = "daemon")]
    pub fn run(&self, signals: &crate::daemon::signals::SignalHandler) -> Result<()> {
        use crate::daemon::heartbeat::Heartbeat;
        use crate::hotfolder::worker::SLEEP_SLICE;

        let (heartbeat_path, heartbeat_every, version_hash, roots) = {
            let config = self.config.read();
            (
                config.paths.heartbeat_file.clone(),
                Duration::from_secs(config.dispatcher.heartbeat_interval_secs.max(1)),
                config.stable_hash()?,
                config.hotfolders.roots.len(),
            )
        };
        self.logger.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: version_hash,
            roots,
        });

        let mut heartbeat = Heartbeat::new(heartbeat_path, heartbeat_every);
        let mut next_discovery = Some(Instant::now());
        while !signals.should_shutdown() {
            if signals.should_reload() {
                match self.reload() {
                    Ok(_) => next_discovery = Some(Instant::now()),
                    Err(err) => self.logger.send(ActivityEvent::Error {
                        code: err.code().to_string(),
                        message: format!("config reload failed: {err}"),
                    }),
                }
            }
            if signals.should_discover() {
                next_discovery = Some(Instant::now());
            }
            if next_discovery.is_some_and(|at| Instant::now() >= at) {
                self.discover_once();
                let every = self.config.read().dispatcher.discovery_interval_secs.max(1);
                // None: the interval outruns the clock; only a signal rediscovers.
                next_discovery = Instant::now().checked_add(Duration::from_secs(every));
            }
            heartbeat.maybe_write(&self.watched_folders());
            thread::sleep(SLEEP_SLICE);
        }

        let timeout = Duration::from_secs(self.config.read().dispatcher.shutdown_timeout_secs);
        let stuck = self.shutdown(timeout);
        self.logger.send(ActivityEvent::DaemonStopped {
            reason: if stuck == 0 {
                "signal".to_string()
            } else {
                format!("signal ({stuck} worker(s) abandoned)")
            },
            uptime_secs: self.uptime().as_secs(),
        });
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Enumerate hotfolders under every configured root.
///
/// Hidden directories and any directory that is itself an output root are
/// skipped. Missing roots are appended to `missing_roots`.
pub fn discover_folders(config: &Config, missing_roots: &mut Vec<PathBuf>) -> Vec<DiscoveredFolder> {
    let output_roots: HashSet<PathBuf> = config
        .hotfolders
        .roots
        .iter()
        .map(|root| resolve_absolute_path(&config.hotfolders.output_root_for(root)))
        .collect();

    let mut found = Vec::new();
    for root in &config.hotfolders.roots {
        let Ok(entries) = fs::read_dir(root) else {
            missing_roots.push(root.clone());
            continue;
        };
        let output_root = config.hotfolders.output_root_for(root);
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_reserved_name(&name) || !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let folder = entry.path();
            if output_roots.contains(&resolve_absolute_path(&folder)) {
                continue;
            }
            found.push(DiscoveredFolder {
                output_dir: output_root.join(&name),
                folder,
            });
        }
    }
    found.sort();
    found.dedup_by(|a, b| a.folder == b.folder);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotfolder::metadata::NullMetadataWriter;

    fn config_for(root: &Path) -> Config {
        let mut config = Config::default();
        config.hotfolders.roots = vec![root.to_path_buf()];
        config.defaults.scan_interval_secs = 3600;
        config
    }

    fn dispatcher(config: Config) -> Dispatcher {
        Dispatcher::new(config, ActivityLoggerHandle::detached(), Arc::new(NullMetadataWriter)).unwrap()
    }

    #[test]
    fn requires_roots() {
        let err = Dispatcher::new(
            Config::default(),
            ActivityLoggerHandle::detached(),
            Arc::new(NullMetadataWriter),
        )
        .err()
        .expect("empty roots rejected");
        assert!(err.is_config());
    }

    #[test]
    fn discovery_skips_hidden_files_and_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("IN");
        fs::create_dir_all(root.join("client-a")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::create_dir_all(root.join("OUT")).unwrap();
        fs::write(root.join("loose.txt"), b"x").unwrap();

        let mut config = config_for(&root);
        config.hotfolders.output_root = Some(root.join("OUT"));
        let mut missing = Vec::new();
        let found = discover_folders(&config, &mut missing);

        assert!(missing.is_empty());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].folder, root.join("client-a"));
        assert_eq!(found[0].output_dir, root.join("OUT").join("client-a"));
    }

    #[test]
    fn default_output_is_sibling_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("IN");
        fs::create_dir_all(root.join("client-a")).unwrap();
        let mut missing = Vec::new();
        let found = discover_folders(&config_for(&root), &mut missing);
        assert_eq!(found[0].output_dir, dir.path().join("OUT").join("client-a"));
    }

    #[test]
    fn one_worker_per_folder_and_retirement() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("IN");
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        let d = dispatcher(config_for(&root));

        let first = d.discover_once();
        assert_eq!(first.started.len(), 2);
        assert!(dir.path().join("OUT").join("a").is_dir());

        let second = d.discover_once();
        assert!(second.started.is_empty());
        assert_eq!(d.watched_folders().len(), 2);

        // Hiding the folder takes it out of discovery without racing its worker.
        fs::rename(root.join("b"), root.join(".b")).unwrap();
        let third = d.discover_once();
        assert_eq!(third.retired, vec![root.join("b")]);
        assert_eq!(d.watched_folders(), vec![root.join("a")]);

        assert_eq!(d.shutdown(Duration::from_secs(5)), 0);
        assert!(d.watched_folders().is_empty());
    }

    #[test]
    fn reappearing_folder_waits_for_its_retired_worker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("IN");
        fs::create_dir_all(root.join("a")).unwrap();
        let d = dispatcher(config_for(&root));

        // Stand-in for a retired worker still inside a long cycle.
        let (release, hold) = crossbeam_channel::bounded::<()>(0);
        let join = thread::spawn(move || {
            let _ = hold.recv();
            WorkerExit::Retired
        });
        d.registry.lock().retiring.push(WorkerHandle {
            folder: root.join("a"),
            output_dir: dir.path().join("OUT").join("a"),
            retire: Arc::new(AtomicBool::new(true)),
            join,
        });

        let blocked = d.discover_once();
        assert!(blocked.started.is_empty());
        assert_eq!(blocked.deferred, vec![root.join("a")]);
        assert!(d.watched_folders().is_empty());

        drop(release);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !d.registry.lock().retiring.iter().all(WorkerHandle::is_finished)
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }

        let resumed = d.discover_once();
        assert_eq!(resumed.started, vec![root.join("a")]);
        assert!(resumed.deferred.is_empty());
        assert!(d.registry.lock().retiring.is_empty());
        assert_eq!(d.shutdown(Duration::from_secs(5)), 0);
    }

    #[test]
    fn retire_and_return_never_runs_two_live_workers() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("IN");
        fs::create_dir_all(root.join("a")).unwrap();
        let d = dispatcher(config_for(&root));
        d.discover_once();

        fs::rename(root.join("a"), root.join(".parked")).unwrap();
        assert_eq!(d.discover_once().retired, vec![root.join("a")]);
        fs::rename(root.join(".parked"), root.join("a")).unwrap();
        let report = d.discover_once();

        let registry = d.registry.lock();
        let live_retiring = registry.is_retiring(&root.join("a"));
        let active = registry.active.contains_key(&root.join("a"));
        assert!(!(live_retiring && active), "two live workers for one folder");
        assert_eq!(report.started.len() + report.deferred.len(), 1);
        drop(registry);
        assert_eq!(d.shutdown(Duration::from_secs(5)), 0);
    }

    #[cfg(feature = "daemon")]
    #[test]
    fn huge_intervals_do_not_stop_the_daemon_loop() {
        use crate::daemon::signals::SignalHandler;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("IN");
        fs::create_dir_all(root.join("a")).unwrap();
        let mut config = config_for(&root);
        config.dispatcher.discovery_interval_secs = u64::MAX;
        config.dispatcher.shutdown_timeout_secs = u64::MAX;
        config.paths.heartbeat_file = dir.path().join("heartbeat.json");
        let d = dispatcher(config);
        let signals = SignalHandler::unregistered();
        let remote = signals.clone();

        thread::scope(|scope| {
            let running = scope.spawn(|| d.run(&signals));
            thread::sleep(Duration::from_millis(400));
            remote.request_discover();
            thread::sleep(Duration::from_millis(400));
            remote.request_shutdown();
            assert!(running.join().expect("daemon loop panicked").is_ok());
        });
        assert!(d.watched_folders().is_empty());
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(config_for(&dir.path().join("absent")));
        let report = d.discover_once();
        assert_eq!(report.missing_roots, vec![dir.path().join("absent")]);
        assert!(report.started.is_empty());
    }

    #[test]
    fn once_pass_cycles_every_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("IN");
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a").join("job.txt"), b"x").unwrap();
        let mut config = config_for(&root);
        config.defaults.resting_time_secs = 0;

        let pass = dispatcher(config).cycle_all_once();
        assert_eq!(pass.outcomes.len(), 1);
        let (folder, outcome) = &pass.outcomes[0];
        assert_eq!(folder, &root.join("a"));
        let report = outcome.as_ref().unwrap().report().unwrap();
        assert_eq!(report.transferred, vec!["job.txt".to_string()]);
        assert!(dir.path().join("OUT").join("a").join("job.txt").is_file());
    }
}
