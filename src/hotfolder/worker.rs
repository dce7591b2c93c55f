//! Folder worker: the per-job state machine for one hotfolder.
//!
//! Each cycle runs, in order:
//! 1. reconcile records against what is on disk,
//! 2. remove containers emptied by dissolution on an earlier cycle,
//! 3. observe new items and refresh the debounce window of changed jobs,
//! 4. transfer jobs that have rested long enough and are not yet processed
//!    under their current signature,
//! 5. sweep retained copies past their TTL.
//!
//! Failures are contained per job. Only failing to open the state store stops
//! the worker; a vanished folder ends the cycle with [`CycleOutcome::FolderVanished`].

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::core::config::{Config, FolderSettings, effective_settings, write_example_override};
use crate::core::errors::{HfwError, Result};
use crate::core::paths::{id_is_under, id_to_path, now_epoch_secs};
use crate::hotfolder::items::{JobSnapshot, SystemFileFilter, exists, is_effectively_empty, list_jobs};
use crate::hotfolder::metadata::MetadataWriter;
use crate::hotfolder::retention::{SweepReport, sweep};
use crate::hotfolder::transfer::{TransferExecutor, TransferOptions};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::store::{SeenRecord, StateStore};

/// Granularity of the inter-cycle sleep; bounds how long stop flags go unnoticed.
pub const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Mtimes closer than this are the same version.
const MTIME_EPSILON: f64 = 1e-6;

/// Everything a worker needs from its owner.
#[derive(Clone)]
pub struct WorkerContext {
    pub folder: PathBuf,
    pub output_dir: PathBuf,
    pub config: Arc<RwLock<Config>>,
    pub logger: ActivityLoggerHandle,
    pub metadata: Arc<dyn MetadataWriter>,
}

/// Stop flags observed between cycles.
#[derive(Debug, Clone, Default)]
pub struct WorkerFlags {
    /// Process-wide shutdown.
    pub shutdown: Arc<AtomicBool>,
    /// This worker's folder is gone from discovery.
    pub retire: Arc<AtomicBool>,
}

impl WorkerFlags {
    pub fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed) || self.retire.load(Ordering::Relaxed)
    }
}

/// Counts for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records dropped because their item left the folder.
    pub reconciled: usize,
    pub containers_pruned: usize,
    pub arrivals: usize,
    /// Jobs whose debounce window restarted.
    pub resets: usize,
    pub waiting: usize,
    pub transferred: Vec<String>,
    pub moved_items: usize,
    pub transfer_failures: usize,
    pub sweep: SweepReport,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The hotfolder disappeared; nothing further was attempted.
    FolderVanished,
    /// The effective settings could not be built; the cycle was skipped.
    ConfigRejected(HfwError),
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    Retired,
    FolderVanished,
    /// The state store could not be opened; the worker never ran a cycle.
    StoreUnavailable,
}

pub struct FolderWorker {
    ctx: WorkerContext,
    name: String,
    store: StateStore,
    /// Last logged stability per job, so transitions are logged once.
    stability: HashMap<String, bool>,
    settings: Option<FolderSettings>,
    example_checked: bool,
}

impl FolderWorker {
    /// Open the folder's state store. Failure here is fatal for this worker.
    pub fn open(ctx: WorkerContext) -> Result<Self> {
        let store = StateStore::open_for_folder(&ctx.folder)?;
        let name = ctx
            .folder
            .file_name()
            .map_or_else(|| ctx.folder.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self {
            ctx,
            name,
            store,
            stability: HashMap::new(),
            settings: None,
            example_checked: false,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.ctx.folder
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Settings used by the last cycle that got past configuration.
    pub fn settings(&self) -> Option<&FolderSettings> {
        self.settings.as_ref()
    }

    /// Run cycles until a stop flag is raised or the folder vanishes.
    pub fn run(mut self, flags: &WorkerFlags) -> WorkerExit {
        let exit = loop {
            if flags.shutdown.load(Ordering::Relaxed) {
                break WorkerExit::Shutdown;
            }
            if flags.retire.load(Ordering::Relaxed) {
                break WorkerExit::Retired;
            }
            if matches!(self.run_cycle(), CycleOutcome::FolderVanished) {
                break WorkerExit::FolderVanished;
            }
            sleep_sliced(self.scan_interval(), flags);
        };
        self.ctx.logger.send(ActivityEvent::WorkerStopped {
            folder: self.ctx.folder.clone(),
            reason: format!("{exit:?}").to_lowercase(),
        });
        exit
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.run_cycle_at(now_epoch_secs())
    }

    /// One full cycle with an explicit clock.
    pub fn run_cycle_at(&mut self, now: f64) -> CycleOutcome {
        if !self.ctx.folder.is_dir() {
            return self.vanished();
        }

        let settings = {
            let config = self.ctx.config.read();
            effective_settings(&self.ctx.folder, &config)
        };
        let settings = match settings {
            Ok(settings) => settings,
            Err(err) => {
                self.log(ActivityEvent::ConfigRejected {
                    folder: self.ctx.folder.clone(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return CycleOutcome::ConfigRejected(err);
            }
        };
        self.settings = Some(settings.clone());
        self.ensure_example(&settings);

        let filter = SystemFileFilter::from_settings(&settings);
        let mut jobs = match list_jobs(&self.ctx.folder, filter) {
            Ok(jobs) => jobs,
            Err(err) if err.is_not_found() => return self.vanished(),
            Err(err) => {
                self.warn(format!("listing failed: {err}"));
                return CycleOutcome::Completed(CycleReport::default());
            }
        };

        let mut report = CycleReport::default();
        let removed = self.reconcile(&jobs, &mut report);
        let pruned = self.prune_containers(&settings, &mut report);
        jobs.retain(|job| !pruned.contains(&job.id));

        let mut seen: HashMap<String, SeenRecord> = self
            .store
            .all_seen()
            .unwrap_or_default()
            .into_iter()
            .map(|rec| (rec.item_id.clone(), rec))
            .collect();
        let executor = TransferExecutor::new(
            TransferOptions::from_settings(&settings, &self.name),
            Arc::clone(&self.ctx.metadata),
        );

        for job in &jobs {
            if let Err(err) = self.handle_job(job, now, &settings, &executor, &mut seen, &removed, &mut report) {
                self.log(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: format!("{}: job {}: {err}", self.ctx.folder.display(), job.id),
                });
            }
        }
        self.stability.retain(|id, _| jobs.iter().any(|job| &job.id == id));

        if settings.retention_armed() {
            match sweep(&self.ctx.folder, &self.store, &settings, now) {
                Ok(sweep_report) => {
                    self.log_sweep(&sweep_report);
                    report.sweep = sweep_report;
                }
                Err(err) => self.warn(format!("retention sweep failed: {err}")),
            }
        }

        CycleOutcome::Completed(report)
    }

    // ──────────────────── cycle steps ────────────────────

    /// Drop records of items no longer on disk. Returns the removed seen ids.
    fn reconcile(&self, jobs: &[JobSnapshot], report: &mut CycleReport) -> Vec<String> {
        let present: HashSet<&str> = jobs.iter().flat_map(JobSnapshot::item_ids).collect();
        let mut removed = Vec::new();

        if let Ok(seen) = self.store.all_seen() {
            for rec in seen {
                if present.contains(rec.item_id.as_str()) {
                    continue;
                }
                match self.store.remove_seen(&rec.item_id) {
                    Ok(_) => removed.push(rec.item_id),
                    Err(err) => self.warn(format!("could not drop seen record {}: {err}", rec.item_id)),
                }
            }
        }
        let mut processed_removed = 0;
        if let Ok(processed) = self.store.all_processed() {
            for rec in processed {
                if present.contains(rec.item_id.as_str())
                    || exists(&id_to_path(&self.ctx.folder, &rec.item_id))
                {
                    continue;
                }
                match self.store.remove_processed(&rec.item_id) {
                    Ok(_) => processed_removed += 1,
                    Err(err) => {
                        self.warn(format!("could not drop processed record {}: {err}", rec.item_id));
                    }
                }
            }
        }

        report.reconciled = removed.len() + processed_removed;
        if report.reconciled > 0 {
            self.log(ActivityEvent::RecordsReconciled {
                folder: self.ctx.folder.clone(),
                removed: report.reconciled,
            });
        }
        removed
    }

    /// Remove job directories that dissolution emptied on an earlier cycle.
    fn prune_containers(&self, settings: &FolderSettings, report: &mut CycleReport) -> HashSet<String> {
        let mut pruned = HashSet::new();
        let Ok(ready) = self.store.ready_for_deletion_jobs() else {
            return pruned;
        };
        for job in ready {
            let path = id_to_path(&self.ctx.folder, &job);
            if !exists(&path) {
                if let Err(err) = self.store.remove_prefix(&job) {
                    self.warn(format!("could not drop records of vanished container {job}: {err}"));
                }
                pruned.insert(job);
                continue;
            }
            if !path.is_dir() || !is_effectively_empty(&path) {
                // New content arrived in the container: treat it as a fresh job.
                if let Err(err) = self.store.remove_processed(&job) {
                    self.warn(format!("could not clear processed record of refilled container {job}: {err}"));
                }
                self.debug(settings, format!("container {job} refilled; clearing processed record"));
                continue;
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    if let Err(err) = self.store.remove_prefix(&job) {
                        self.warn(format!("could not drop records of removed container {job}: {err}"));
                    }
                    report.containers_pruned += 1;
                    self.log(ActivityEvent::ContainerRemoved {
                        folder: self.ctx.folder.clone(),
                        job: job.clone(),
                    });
                    pruned.insert(job);
                }
                Err(e) => self.warn(format!("could not remove emptied container {job}: {e}")),
            }
        }
        pruned
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_job(
        &mut self,
        job: &JobSnapshot,
        now: f64,
        settings: &FolderSettings,
        executor: &TransferExecutor,
        seen: &mut HashMap<String, SeenRecord>,
        removed: &[String],
        report: &mut CycleReport,
    ) -> Result<()> {
        let signature = job.aggregate_mtime();

        if seen.contains_key(&job.id) {
            let mut changed = seen
                .get(&job.id)
                .is_some_and(|rec| mtime_differs(rec.mtime, signature));
            for (id, mtime) in &job.nested {
                let fresh = seen.get(id).is_none_or(|rec| mtime_differs(rec.mtime, *mtime));
                if fresh {
                    self.stamp(seen, id, now, *mtime)?;
                    changed = true;
                    self.debug(settings, format!("{id} added or modified"));
                }
            }
            if removed.iter().any(|id| id != &job.id && id_is_under(id, &job.id)) {
                changed = true;
            }
            if changed {
                self.stamp(seen, &job.id, now, signature)?;
                report.resets += 1;
                self.debug(settings, format!("{} changed; resting window restarted", job.id));
            }
        } else {
            self.stamp(seen, &job.id, now, signature)?;
            for (id, mtime) in &job.nested {
                self.stamp(seen, id, now, *mtime)?;
            }
            report.arrivals += 1;
            self.log(ActivityEvent::JobArrived {
                folder: self.ctx.folder.clone(),
                job: job.id.clone(),
                nested: job.nested.keys().cloned().collect(),
            });
        }

        let newest_seen = job
            .item_ids()
            .filter_map(|id| seen.get(id).map(|rec| rec.seen_time))
            .fold(f64::MIN, f64::max);
        let resting = settings.resting_secs_f64();
        let stable = now - newest_seen >= resting;
        self.note_stability(job, stable, newest_seen + resting);
        if !stable {
            report.waiting += 1;
            return Ok(());
        }

        match self.store.processed(&job.id) {
            Ok(Some(processed)) => {
                if processed.ready_for_deletion {
                    return Ok(());
                }
                if (settings.keep_copy && settings.ignore_updates)
                    || !mtime_differs(processed.mtime, signature)
                {
                    return Ok(());
                }
                self.debug(settings, format!("{} changed since last transfer", job.id));
            }
            Ok(None) => {}
            Err(err) => self.warn(format!("processed lookup for {} failed: {err}", job.id)),
        }

        self.transfer(job, signature, now, executor, report)
    }

    fn transfer(
        &mut self,
        job: &JobSnapshot,
        signature: f64,
        now: f64,
        executor: &TransferExecutor,
        report: &mut CycleReport,
    ) -> Result<()> {
        let started = Instant::now();
        let outcome = match executor.execute(job, &self.ctx.output_dir) {
            Ok(outcome) => outcome,
            Err(err) => {
                report.transfer_failures += 1;
                self.log(ActivityEvent::TransferFailed {
                    folder: self.ctx.folder.clone(),
                    job: job.id.clone(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return Ok(());
            }
        };

        self.store.upsert_processed(&job.id, now, signature)?;
        for emptied in &outcome.jobs_marked_empty {
            self.store.mark_ready_for_deletion(emptied)?;
        }
        for warning in &outcome.warnings {
            self.warn(warning.clone());
        }
        report.moved_items += outcome.moved_count;
        report.transferred.push(job.id.clone());
        self.log(ActivityEvent::JobTransferred {
            folder: self.ctx.folder.clone(),
            job: job.id.clone(),
            destination: self.ctx.output_dir.clone(),
            moved: outcome.moved_count,
            keep_copy: executor.options().keep_copy,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
        Ok(())
    }

    // ──────────────────── helpers ────────────────────

    fn stamp(&self, seen: &mut HashMap<String, SeenRecord>, id: &str, now: f64, mtime: f64) -> Result<()> {
        self.store.upsert_seen(id, now, mtime)?;
        seen.insert(
            id.to_string(),
            SeenRecord {
                item_id: id.to_string(),
                seen_time: now,
                mtime,
            },
        );
        Ok(())
    }

    fn note_stability(&mut self, job: &JobSnapshot, stable: bool, ready_at: f64) {
        if self.stability.insert(job.id.clone(), stable) == Some(stable) {
            return;
        }
        let folder = self.ctx.folder.clone();
        let job = job.id.clone();
        self.log(if stable {
            ActivityEvent::JobStable { folder, job }
        } else {
            ActivityEvent::JobWaiting { folder, job, ready_at }
        });
    }

    fn log_sweep(&self, sweep: &SweepReport) {
        for item in &sweep.purged {
            self.log(ActivityEvent::RetentionPurged {
                folder: self.ctx.folder.clone(),
                item: item.clone(),
                deleted_from_disk: sweep.deleted_from_disk.contains(item),
            });
        }
        for job in &sweep.containers_removed {
            self.log(ActivityEvent::ContainerRemoved {
                folder: self.ctx.folder.clone(),
                job: job.clone(),
            });
        }
        for failure in &sweep.failures {
            self.log(ActivityEvent::RetentionFailed {
                folder: self.ctx.folder.clone(),
                item: failure.item_id.clone(),
                code: failure.code.clone(),
                message: failure.message.clone(),
            });
        }
    }

    fn ensure_example(&mut self, settings: &FolderSettings) {
        if self.example_checked {
            return;
        }
        self.example_checked = true;
        if let Err(err) = write_example_override(&self.ctx.folder, settings) {
            self.warn(format!("could not write example override: {err}"));
        }
    }

    fn vanished(&self) -> CycleOutcome {
        self.log(ActivityEvent::FolderVanished {
            folder: self.ctx.folder.clone(),
        });
        CycleOutcome::FolderVanished
    }

    fn scan_interval(&self) -> Duration {
        let secs = self.settings.as_ref().map_or_else(
            || self.ctx.config.read().defaults.scan_interval_secs,
            |s| s.scan_interval_secs,
        );
        Duration::from_secs(secs.max(1))
    }

    fn log(&self, event: ActivityEvent) {
        self.ctx.logger.send(event);
    }

    fn warn(&self, message: String) {
        self.log(ActivityEvent::Warning {
            folder: Some(self.ctx.folder.clone()),
            message,
        });
    }

    fn debug(&self, settings: &FolderSettings, message: String) {
        if settings.debug {
            self.log(ActivityEvent::Debug {
                folder: self.ctx.folder.clone(),
                message,
            });
        }
    }
}

fn mtime_differs(a: f64, b: f64) -> bool {
    (a - b).abs() > MTIME_EPSILON
}

/// Sleep for `total`, waking every [`SLEEP_SLICE`] to check the stop flags.
///
/// A `total` too large for [`Instant`] sleeps until a flag is raised.
pub fn sleep_sliced(total: Duration, flags: &WorkerFlags) {
    let deadline = Instant::now().checked_add(total);
    while !flags.should_stop() {
        let slice = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                remaining.min(SLEEP_SLICE)
            }
            None => SLEEP_SLICE,
        };
        thread::sleep(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::folder_override_path;
    use crossbeam_channel::Receiver;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        folder: PathBuf,
        output: PathBuf,
        events: Receiver<ActivityEvent>,
        worker: FolderWorker,
    }

    fn fixture(defaults: FolderSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("IN").join("client");
        let output = dir.path().join("OUT").join("client");
        fs::create_dir_all(&folder).unwrap();
        let config = Config {
            defaults,
            ..Config::default()
        };
        let (logger, events) = ActivityLoggerHandle::channel(1024);
        let worker = FolderWorker::open(WorkerContext {
            folder: folder.clone(),
            output_dir: output.clone(),
            config: Arc::new(RwLock::new(config)),
            logger,
            metadata: Arc::new(crate::hotfolder::metadata::NullMetadataWriter),
        })
        .unwrap();
        Fixture {
            _dir: dir,
            folder,
            output,
            events,
            worker,
        }
    }

    fn resting(secs: u64) -> FolderSettings {
        FolderSettings {
            resting_time_secs: secs,
            ..FolderSettings::default()
        }
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            other => panic!("expected completed cycle, got {other:?}"),
        }
    }

    fn drain(rx: &Receiver<ActivityEvent>) -> Vec<ActivityEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn file_job_waits_then_transfers_once() {
        let mut fx = fixture(resting(300));
        fs::write(fx.folder.join("a.pdf"), b"pdf").unwrap();
        let t = 10_000.0;

        let first = completed(fx.worker.run_cycle_at(t));
        assert_eq!(first.arrivals, 1);
        assert!(first.transferred.is_empty());

        let early = completed(fx.worker.run_cycle_at(t + 100.0));
        assert!(early.transferred.is_empty());
        assert_eq!(early.waiting, 1);

        let done = completed(fx.worker.run_cycle_at(t + 301.0));
        assert_eq!(done.transferred, vec!["a.pdf".to_string()]);
        assert!(fx.output.join("a.pdf").is_file());
        assert!(!fx.folder.join("a.pdf").exists());

        let after = completed(fx.worker.run_cycle_at(t + 400.0));
        assert!(after.transferred.is_empty());
        assert_eq!(after.reconciled, 2);
        assert!(fx.worker.store().all_seen().unwrap().is_empty());
    }

    #[test]
    fn stability_transitions_logged_once() {
        let mut fx = fixture(FolderSettings {
            keep_copy: true,
            ..resting(10)
        });
        fs::write(fx.folder.join("a.txt"), b"x").unwrap();
        fx.worker.run_cycle_at(100.0);
        fx.worker.run_cycle_at(105.0);
        fx.worker.run_cycle_at(111.0);
        fx.worker.run_cycle_at(120.0);

        let events = drain(&fx.events);
        let waiting = events
            .iter()
            .filter(|e| matches!(e, ActivityEvent::JobWaiting { .. }))
            .count();
        let stable = events
            .iter()
            .filter(|e| matches!(e, ActivityEvent::JobStable { .. }))
            .count();
        let transferred = events
            .iter()
            .filter(|e| matches!(e, ActivityEvent::JobTransferred { .. }))
            .count();
        assert_eq!(waiting, 1);
        assert_eq!(stable, 1);
        assert_eq!(transferred, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            ActivityEvent::JobWaiting { ready_at, .. } if (*ready_at - 110.0).abs() < 1e-9
        )));
    }

    #[test]
    fn copy_mode_retransfers_changed_job_unless_ignoring_updates() {
        for ignore_updates in [false, true] {
            let mut fx = fixture(FolderSettings {
                keep_copy: true,
                ignore_updates,
                update_mtime: false,
                ..resting(0)
            });
            let src = fx.folder.join("a.txt");
            fs::write(&src, b"v1").unwrap();
            filetime::set_file_mtime(&src, filetime::FileTime::from_unix_time(1_000, 0)).unwrap();
            let first = completed(fx.worker.run_cycle_at(5_000.0));
            assert_eq!(first.transferred.len(), 1);

            let unchanged = completed(fx.worker.run_cycle_at(5_010.0));
            assert!(unchanged.transferred.is_empty());

            fs::write(&src, b"v2").unwrap();
            filetime::set_file_mtime(&src, filetime::FileTime::from_unix_time(2_000, 0)).unwrap();
            let changed = completed(fx.worker.run_cycle_at(5_020.0));
            assert_eq!(changed.resets, 1);
            assert_eq!(changed.transferred.len(), usize::from(!ignore_updates));
            let expected: &[u8] = if ignore_updates { b"v1" } else { b"v2" };
            assert_eq!(fs::read(fx.output.join("a.txt")).unwrap(), expected);
        }
    }

    #[test]
    fn invalid_override_skips_cycle() {
        let mut fx = fixture(resting(0));
        fs::write(fx.folder.join("a.txt"), b"x").unwrap();
        let path = folder_override_path(&fx.folder);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[schedule]\nscan_interval = \"fast\"\n").unwrap();

        let outcome = fx.worker.run_cycle_at(1_000.0);
        assert!(matches!(outcome, CycleOutcome::ConfigRejected(ref e) if e.is_config()));
        assert!(fx.folder.join("a.txt").exists());
        assert!(fx.worker.store().all_seen().unwrap().is_empty());
        assert!(
            drain(&fx.events)
                .iter()
                .any(|e| matches!(e, ActivityEvent::ConfigRejected { .. }))
        );

        fs::remove_file(&path).unwrap();
        let report = completed(fx.worker.run_cycle_at(1_001.0));
        assert_eq!(report.transferred.len(), 1);
    }

    #[test]
    fn vanished_folder_is_named_outcome() {
        let mut fx = fixture(resting(0));
        fs::remove_dir_all(&fx.folder).unwrap();
        assert!(matches!(fx.worker.run_cycle_at(1.0), CycleOutcome::FolderVanished));
    }

    #[test]
    fn example_override_written_on_first_cycle() {
        let mut fx = fixture(resting(0));
        fx.worker.run_cycle_at(1.0);
        assert!(fx.folder.join(".config").join("config.toml.example").is_file());
        assert!(fx.worker.settings().is_some());
    }

    #[test]
    fn debug_events_only_when_enabled() {
        let mut quiet = fixture(resting(100));
        fs::create_dir_all(quiet.folder.join("job")).unwrap();
        quiet.worker.run_cycle_at(1.0);
        fs::write(quiet.folder.join("job").join("late.txt"), b"x").unwrap();
        quiet.worker.run_cycle_at(2.0);
        assert!(!drain(&quiet.events).iter().any(|e| matches!(e, ActivityEvent::Debug { .. })));

        let mut loud = fixture(FolderSettings {
            debug: true,
            ..resting(100)
        });
        fs::create_dir_all(loud.folder.join("job")).unwrap();
        loud.worker.run_cycle_at(1.0);
        fs::write(loud.folder.join("job").join("late.txt"), b"x").unwrap();
        loud.worker.run_cycle_at(2.0);
        assert!(drain(&loud.events).iter().any(|e| matches!(e, ActivityEvent::Debug { .. })));
    }

    #[test]
    fn store_errors_during_cleanup_are_logged() {
        let mut fx = fixture(FolderSettings {
            dissolve_folders: true,
            ..resting(0)
        });
        let job = fx.folder.join("batch");
        fs::create_dir_all(&job).unwrap();
        fs::write(job.join("a.txt"), b"a").unwrap();
        let first = completed(fx.worker.run_cycle_at(1_000.0));
        assert_eq!(first.transferred, vec!["batch".to_string()]);
        assert!(fx.worker.store().processed("batch").unwrap().unwrap().ready_for_deletion);

        fs::remove_dir_all(&job).unwrap();
        let conn = rusqlite::Connection::open(StateStore::path_for(&fx.folder)).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER pin_batch BEFORE DELETE ON processed_files
             WHEN old.file_path = 'batch'
             BEGIN SELECT RAISE(ABORT, 'record pinned'); END;",
        )
        .unwrap();
        drain(&fx.events);

        completed(fx.worker.run_cycle_at(1_010.0));
        let warnings: Vec<String> = drain(&fx.events)
            .into_iter()
            .filter_map(|e| match e {
                ActivityEvent::Warning { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert!(
            warnings.iter().any(|m| m.contains("could not drop processed record batch")),
            "{warnings:?}"
        );
        assert!(
            warnings
                .iter()
                .any(|m| m.contains("could not drop records of vanished container batch")),
            "{warnings:?}"
        );
        assert!(fx.worker.store().processed("batch").unwrap().is_some());
    }

    #[test]
    fn run_loop_exits_on_retire() {
        let fx = fixture(FolderSettings {
            scan_interval_secs: 3600,
            ..resting(0)
        });
        let flags = WorkerFlags::default();
        let retire = Arc::clone(&flags.retire);
        let handle = thread::spawn(move || fx.worker.run(&flags));
        thread::sleep(Duration::from_millis(100));
        retire.store(true, Ordering::Relaxed);
        assert_eq!(handle.join().unwrap(), WorkerExit::Retired);
    }

    #[test]
    fn sleep_with_unrepresentable_deadline_honours_flags() {
        let flags = WorkerFlags::default();
        flags.shutdown.store(true, Ordering::Relaxed);
        sleep_sliced(Duration::MAX, &flags);
    }

    #[test]
    fn huge_override_interval_keeps_worker_alive() {
        let fx = fixture(resting(0));
        let path = folder_override_path(&fx.folder);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("[schedule]\nscan_interval = {}\n", i64::MAX)).unwrap();
        fs::write(fx.folder.join("a.txt"), b"x").unwrap();

        let flags = WorkerFlags::default();
        let shutdown = Arc::clone(&flags.shutdown);
        let handle = thread::spawn(move || fx.worker.run(&flags));
        thread::sleep(Duration::from_millis(300));
        shutdown.store(true, Ordering::Relaxed);
        assert_eq!(handle.join().unwrap(), WorkerExit::Shutdown);
        assert!(fx.output.join("a.txt").is_file());
    }
}
