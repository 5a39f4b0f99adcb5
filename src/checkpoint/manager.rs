use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::checkpoint::metadata::{
    finite_metrics, parse_step_tag, primary_metric, EvalRecord, Metrics,
};
use crate::checkpoint::metrics_store::MetricsStore;
use crate::checkpoint::policy::{EarlyStoppingConfig, EvalPolicy, RunState, StopReason, Verdict};
use crate::checkpoint::pointer::{read_pointer, update_pointer, Pointer};
use crate::checkpoint::retention::{PruneReport, RetainedCheckpoint, RetentionWindow};
use crate::error::CheckpointError;
use crate::training::{Control, Directive, EvalHistory, TrainingEvent};

/// Configuration for the checkpoint lifecycle.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CheckpointManagerConfig {
    /// Taken from `[paths].checkpoints_dir` when loaded through `AppConfig`.
    #[serde(skip)]
    pub checkpoint_dir: PathBuf,
    /// Maximum number of retained checkpoints besides `best`.
    pub keep_last_n: usize,
    /// Sub-directory of `checkpoint_dir` holding per-step eval records.
    pub metrics_dir_name: String,
}

impl Default for CheckpointManagerConfig {
    fn default() -> Self {
        CheckpointManagerConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
            keep_last_n: 3,
            metrics_dir_name: "metrics".to_string(),
        }
    }
}

/// Result of reporting a saved checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Registered {
        step: u64,
        promoted_to_best: bool,
        prune: PruneReport,
    },
    Rejected {
        step: u64,
        reason: String,
    },
}

/// Result of [`CheckpointLifecycle::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalize {
    /// Nothing was ever registered; save a checkpoint for `step`, report it,
    /// and call `finalize` again.
    SaveRequired { step: u64 },
    /// The run aborted before any checkpoint existed; there is nothing to
    /// point at.
    NothingToKeep,
    Complete { latest: u64, best: u64 },
}

/// Event-driven governor for one training run's checkpoints.
///
/// Driven by a single training loop, one event at a time and in step order.
/// It owns every registered checkpoint directory and the `latest` / `best`
/// pointers; readers may inspect both at any time.
pub struct CheckpointLifecycle {
    config: CheckpointManagerConfig,
    policy: EvalPolicy,
    state: RunState,
    stop_reason: Option<StopReason>,
    window: RetentionWindow,
    metrics: MetricsStore,
    history: EvalHistory,
    pending_best: Option<u64>,
    latest: Option<u64>,
    best: Option<u64>,
    last_eval_step: Option<u64>,
    last_seen_step: u64,
}

impl CheckpointLifecycle {
    /// Start a fresh run, creating the checkpoint directory if needed.
    pub fn new(
        config: CheckpointManagerConfig,
        early_stopping: EarlyStoppingConfig,
    ) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        let metrics = MetricsStore::new(config.checkpoint_dir.join(&config.metrics_dir_name));
        Ok(CheckpointLifecycle {
            window: RetentionWindow::new(config.keep_last_n),
            policy: EvalPolicy::new(early_stopping),
            state: RunState::Running,
            stop_reason: None,
            metrics,
            history: EvalHistory::new(),
            pending_best: None,
            latest: None,
            best: None,
            last_eval_step: None,
            last_seen_step: 0,
            config,
        })
    }

    /// Rebuild state from an existing checkpoint directory after a restart.
    ///
    /// Checkpoint directories are re-registered in step order, pointers are
    /// read back, and the persisted eval records are replayed through the
    /// policy so best value, previous value and stall count match the
    /// interrupted run.
    pub fn resume(
        config: CheckpointManagerConfig,
        early_stopping: EarlyStoppingConfig,
    ) -> Result<Self, CheckpointError> {
        if !config.checkpoint_dir.is_dir() {
            return Err(CheckpointError::DirNotFound(config.checkpoint_dir.clone()));
        }
        let mut lifecycle = Self::new(config, early_stopping)?;
        let dir = lifecycle.config.checkpoint_dir.clone();

        let mut found = scan_checkpoints(&dir, &lifecycle.config.metrics_dir_name)?;
        found.sort_by_key(|c| c.step);
        for c in &found {
            lifecycle.window.register(c.step, c.path.clone());
        }
        let step_of = |pointer| {
            read_pointer(&dir, pointer)
                .and_then(|tag| parse_step_tag(&tag))
                .filter(|step| lifecycle.window.contains(*step))
        };
        lifecycle.latest = step_of(Pointer::Latest).or(found.last().map(|c| c.step));
        lifecycle.best = step_of(Pointer::Best);

        for record in lifecycle.metrics.load_all() {
            lifecycle.last_seen_step = lifecycle.last_seen_step.max(record.step);
            lifecycle.last_eval_step = Some(record.step);
            if let Some(value) = record.primary() {
                lifecycle.apply_verdict(record.step, value, false);
            }
            lifecycle.history.push(record);
        }
        if let Some(latest) = lifecycle.latest {
            lifecycle.last_seen_step = lifecycle.last_seen_step.max(latest);
        }
        lifecycle.pending_best = None;
        let lagging_best = lifecycle
            .policy
            .best()
            .map(|(step, _)| step)
            .filter(|step| lifecycle.best.map_or(true, |b| b < *step));
        if let Some(best_step) = lagging_best {
            if lifecycle.window.contains(best_step) {
                // killed between the `latest` and `best` pointer updates
                info!(step = best_step, previous = ?lifecycle.best, "promoting registered checkpoint to best");
                lifecycle.best = Some(best_step);
            } else if lifecycle.latest.is_some_and(|l| l > best_step) {
                warn!(step = best_step, "best eval was never checkpointed");
            } else if lifecycle.state == RunState::Running {
                // improving eval whose checkpoint never landed
                lifecycle.pending_best = Some(best_step);
            }
        }
        if lifecycle.latest.is_some() {
            lifecycle.sync_pointers();
            lifecycle.prune();
        }

        info!(
            dir = %dir.display(),
            retained = lifecycle.window.len(),
            evals = lifecycle.history.len(),
            latest = ?lifecycle.latest,
            best = ?lifecycle.best,
            state = %lifecycle.state,
            "resumed checkpoint lifecycle"
        );
        Ok(lifecycle)
    }

    pub fn config(&self) -> &CheckpointManagerConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn history(&self) -> &EvalHistory {
        &self.history
    }

    pub fn latest(&self) -> Option<u64> {
        self.latest
    }

    pub fn best(&self) -> Option<u64> {
        self.best
    }

    pub fn pending_best(&self) -> Option<u64> {
        self.pending_best
    }

    /// Best primary metric value seen so far and its step.
    pub fn best_metric(&self) -> Option<(u64, f64)> {
        self.policy.best()
    }

    /// Retained checkpoints, oldest first.
    pub fn retained(&self) -> Vec<RetainedCheckpoint> {
        self.window.iter().cloned().collect()
    }

    pub fn checkpoint_path(&self, step: u64) -> Option<&Path> {
        self.window.get(step).map(|c| c.path.as_path())
    }

    /// Route one event to its transition function.
    pub fn dispatch(&mut self, event: TrainingEvent) -> Directive {
        match event {
            TrainingEvent::Eval { step, metrics } => self.on_eval(step, &metrics),
            TrainingEvent::CheckpointSaved { step, path } => {
                self.on_checkpoint_saved(step, &path);
                self.current_directive()
            }
            TrainingEvent::Log { step, scalars } => {
                self.on_log(step, &scalars);
                self.current_directive()
            }
            TrainingEvent::Finished => match self.finalize() {
                Finalize::SaveRequired { step } => Directive {
                    save_checkpoint: Some(step),
                    control: Control::Stop(StopReason::Finished { step: Some(step) }),
                },
                Finalize::NothingToKeep | Finalize::Complete { .. } => self.current_directive(),
            },
        }
    }

    fn current_directive(&self) -> Directive {
        match (&self.state, &self.stop_reason) {
            (RunState::AbortedRegression, Some(reason)) => Directive::abort(reason.clone()),
            (state, Some(reason)) if state.is_terminal() => Directive::stop(reason.clone()),
            _ => Directive::proceed(),
        }
    }

    /// Record an evaluation and decide what the training loop does next.
    pub fn on_eval(&mut self, step: u64, metrics: &Metrics) -> Directive {
        if self.state.is_terminal() {
            warn!(step, state = %self.state, "eval reported after run stopped, ignoring");
            return self.current_directive();
        }
        if let Some(last) = self.last_eval_step {
            if step <= last {
                warn!(step, last, "out-of-order eval ignored");
                return Directive::proceed();
            }
        }
        self.last_eval_step = Some(step);
        self.last_seen_step = self.last_seen_step.max(step);

        let (finite, dropped) = finite_metrics(metrics);
        if !dropped.is_empty() {
            warn!(step, keys = ?dropped, "dropping non-finite metrics from eval record");
        }
        let record = EvalRecord::new(step, finite);
        if let Err(e) = self.metrics.write(&record) {
            warn!(step, error = %e, "failed to persist eval metrics");
        }
        self.history.push(record);

        let Some(value) = primary_metric(metrics) else {
            warn!(step, keys = ?metrics.keys().collect::<Vec<_>>(), "eval has no token_accuracy, skipping decision");
            return Directive::proceed();
        };
        self.apply_verdict(step, value, true)
    }

    fn apply_verdict(&mut self, step: u64, value: f64, live: bool) -> Directive {
        if self.state.is_terminal() {
            return self.current_directive();
        }
        match self.policy.observe(step, value) {
            Verdict::Regressed(reason) => {
                if live {
                    error!(step, %reason, "aborting run on regression");
                }
                self.pending_best = None;
                self.enter(reason.clone());
                Directive::abort(reason)
            }
            Verdict::Improved {
                previous_best,
                converged,
            } => {
                if live {
                    info!(step, token_accuracy = value, previous_best = ?previous_best, "new best, requesting checkpoint");
                }
                self.pending_best = Some(step);
                let mut directive = Directive::save(step);
                if let Some(reason) = converged {
                    if live {
                        info!(step, %reason, "run converged");
                    }
                    self.enter(reason.clone());
                    directive.control = Control::Stop(reason);
                }
                directive
            }
            Verdict::Stalled { count, exhausted } => match exhausted {
                Some(reason) => {
                    if live {
                        info!(step, %reason, "stopping: patience exhausted");
                    }
                    self.enter(reason.clone());
                    Directive::stop(reason)
                }
                None => {
                    if live {
                        debug!(step, token_accuracy = value, stalled = count, "no improvement");
                    }
                    Directive::proceed()
                }
            },
        }
    }

    fn enter(&mut self, reason: StopReason) {
        self.state = reason.state();
        self.stop_reason = Some(reason);
    }

    /// Register a checkpoint directory the caller has finished writing.
    pub fn on_checkpoint_saved(&mut self, step: u64, dir: &Path) -> Registration {
        let reject = |reason: String| {
            warn!(step, dir = %dir.display(), %reason, "checkpoint not registered");
            Registration::Rejected { step, reason }
        };

        if self.state == RunState::AbortedRegression {
            return reject("run aborted on regression".to_string());
        }
        if !dir.is_dir() {
            return reject("directory does not exist".to_string());
        }
        if dir.parent() != Some(self.config.checkpoint_dir.as_path()) {
            return reject(format!(
                "not a direct child of {}",
                self.config.checkpoint_dir.display()
            ));
        }
        let Some(tag) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return reject("directory name is not valid UTF-8".to_string());
        };
        if let Some(latest) = self.latest {
            if step < latest {
                return reject(format!("step precedes latest checkpoint {latest}"));
            }
        }

        if !self.window.register(step, dir.to_path_buf()) {
            debug!(step, "checkpoint already registered, refreshing pointers");
        }
        self.latest = Some(step);
        self.last_seen_step = self.last_seen_step.max(step);
        self.set_pointer(Pointer::Latest, &tag);

        let mut promoted_to_best = false;
        match self.pending_best {
            Some(pending) if pending == step => {
                self.best = Some(step);
                self.pending_best = None;
                self.set_pointer(Pointer::Best, &tag);
                promoted_to_best = true;
                info!(step, dir = %dir.display(), "best checkpoint updated");
            }
            Some(pending) if pending < step => {
                warn!(pending, step, "improving eval was never checkpointed, dropping pending best");
                self.pending_best = None;
            }
            _ => {}
        }

        let prune = self.prune();
        Registration::Registered {
            step,
            promoted_to_best,
            prune,
        }
    }

    /// Telemetry pass-through. Never changes run state.
    pub fn on_log(&mut self, step: u64, scalars: &Metrics) {
        self.last_seen_step = self.last_seen_step.max(step);
        debug!(step, scalars = ?scalars, "train log");
    }

    /// Close out the run. Safe to call more than once.
    pub fn finalize(&mut self) -> Finalize {
        if self.state == RunState::Running {
            self.enter(StopReason::Finished {
                step: Some(self.last_seen_step),
            });
        }
        let Some(latest) = self.latest else {
            if self.state == RunState::AbortedRegression {
                warn!("run aborted before any checkpoint was saved");
                return Finalize::NothingToKeep;
            }
            return Finalize::SaveRequired {
                step: self.last_seen_step,
            };
        };

        if self.best.is_none() {
            info!(step = latest, "no improving checkpoint recorded, best defaults to latest");
            self.best = Some(latest);
        }
        self.sync_pointers();
        let best = self.best.unwrap_or(latest);
        Finalize::Complete { latest, best }
    }

    fn prune(&mut self) -> PruneReport {
        self.window.prune(self.best)
    }

    fn tag_of(&self, step: u64) -> Option<String> {
        self.window
            .get(step)
            .and_then(|c| c.path.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Rewrite pointers that are missing or point elsewhere.
    fn sync_pointers(&self) {
        for (pointer, step) in [(Pointer::Latest, self.latest), (Pointer::Best, self.best)] {
            let Some(tag) = step.and_then(|s| self.tag_of(s)) else {
                continue;
            };
            if read_pointer(&self.config.checkpoint_dir, pointer).as_deref() != Some(tag.as_str()) {
                self.set_pointer(pointer, &tag);
            }
        }
    }

    fn set_pointer(&self, pointer: Pointer, tag: &str) {
        if let Err(e) = update_pointer(&self.config.checkpoint_dir, pointer, tag) {
            warn!(pointer = pointer.name(), tag, error = %e, "failed to update pointer");
        }
    }
}

/// Checkpoint directories directly under `dir`. Pointers, the metrics
/// directory and temporary entries are ignored; anything else that does not
/// carry a step-tag is logged.
fn scan_checkpoints(dir: &Path, metrics_dir_name: &str) -> Result<Vec<RetainedCheckpoint>, CheckpointError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == Pointer::Latest.name()
            || name == Pointer::Best.name()
            || name == metrics_dir_name
            || name.starts_with('.')
            || name.ends_with(".tmp")
        {
            continue;
        }
        // symlink_metadata so pointer-like links are not followed
        let is_dir = fs::symlink_metadata(entry.path())
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        match parse_step_tag(&name) {
            Some(step) => found.push(RetainedCheckpoint {
                step,
                path: entry.path(),
            }),
            None => warn!(dir = %entry.path().display(), "ignoring stray directory in checkpoints"),
        }
    }
    Ok(found)
}
