//! Training hooks for customizing the training loop.
//!
//! Hooks see the session at the start and end of training and after every
//! step. The estimator always installs a [`LoggingHook`] and a
//! [`CheckpointSaverHook`]; callers add their own, such as the early
//! stopping hook returned by [`stop_if_no_decrease_hook`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deeprec_checkpoint::{CheckpointConfig, CheckpointError, CheckpointManager, JsonCheckpointer};
use thiserror::Error;
use tracing::{debug, info};

use crate::estimator::EstimatorError;
use crate::eval_history::{EvalHistory, EvalRecord};
use crate::metrics::Metrics;
use crate::variables::VariableStore;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Evaluation failed: {0}")]
    Evaluation(#[source] Box<EstimatorError>),

    #[error("Hook error: {0}")]
    Custom(String),
}

pub type HookResult<T> = Result<T, HookError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Stop,
}

/// What a hook sees after a training step.
pub struct StepContext<'a> {
    /// Global step after the update.
    pub global_step: u64,
    pub metrics: &'a Metrics,
    pub vars: &'a VariableStore,
}

pub trait Hook: Send {
    fn name(&self) -> &str;

    /// Called once before the first step, after any checkpoint is restored.
    fn begin(&mut self, _vars: &VariableStore) -> HookResult<()> {
        Ok(())
    }

    fn before_step(&mut self, _global_step: u64) -> HookResult<()> {
        Ok(())
    }

    fn after_step(&mut self, _ctx: &StepContext<'_>) -> HookResult<HookAction> {
        Ok(HookAction::Continue)
    }

    fn end(&mut self, _vars: &VariableStore, _metrics: Option<&Metrics>) -> HookResult<()> {
        Ok(())
    }
}

/// Fires every N seconds or every N steps, and always on the first check.
#[derive(Debug, Clone)]
pub struct StepTimer {
    every: Trigger,
    last: Option<(Instant, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Secs(u64),
    Steps(u64),
}

impl StepTimer {
    pub fn new(every: Trigger) -> Self {
        Self { every, last: None }
    }

    pub fn should_trigger_for_step(&self, step: u64) -> bool {
        let Some((at, last_step)) = self.last else {
            return true;
        };
        if step == last_step {
            return false;
        }
        match self.every {
            Trigger::Secs(secs) => at.elapsed() >= Duration::from_secs(secs),
            Trigger::Steps(steps) => step >= last_step.saturating_add(steps),
        }
    }

    /// Marks `step` as triggered; returns seconds and steps since the
    /// previous trigger.
    pub fn update_last_triggered_step(&mut self, step: u64) -> Option<(f64, u64)> {
        let now = Instant::now();
        let elapsed = self
            .last
            .map(|(at, last_step)| (now.duration_since(at).as_secs_f64(), step.saturating_sub(last_step)));
        self.last = Some((now, step));
        elapsed
    }
}

/// Logs loss and throughput every `every_n_steps` global steps.
#[derive(Debug)]
pub struct LoggingHook {
    every_n_steps: u64,
    timer: StepTimer,
}

impl LoggingHook {
    pub fn new(every_n_steps: u64) -> Self {
        let every_n_steps = every_n_steps.max(1);
        Self {
            every_n_steps,
            timer: StepTimer::new(Trigger::Steps(every_n_steps)),
        }
    }
}

impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging_hook"
    }

    fn after_step(&mut self, ctx: &StepContext<'_>) -> HookResult<HookAction> {
        if !self.timer.should_trigger_for_step(ctx.global_step) {
            return Ok(HookAction::Continue);
        }
        match self.timer.update_last_triggered_step(ctx.global_step) {
            Some((secs, steps)) if secs > 0.0 => info!(
                global_step = ctx.global_step,
                loss = ctx.metrics.loss,
                steps_per_sec = steps as f64 / secs,
                "loss = {:.6}, step = {}",
                ctx.metrics.loss,
                ctx.global_step
            ),
            _ => info!(
                global_step = ctx.global_step,
                loss = ctx.metrics.loss,
                "loss = {:.6}, step = {}",
                ctx.metrics.loss,
                ctx.global_step
            ),
        }
        debug!(every_n_steps = self.every_n_steps, "Logged training progress");
        Ok(HookAction::Continue)
    }

    fn end(&mut self, vars: &VariableStore, metrics: Option<&Metrics>) -> HookResult<()> {
        match metrics {
            Some(m) => info!(
                global_step = vars.global_step(),
                loss = m.loss,
                "Loss for final step: {:.6}",
                m.loss
            ),
            None => info!(global_step = vars.global_step(), "Training ended without steps"),
        }
        Ok(())
    }
}

/// Reacts to checkpoint saves.
pub trait CheckpointSaverListener: Send {
    fn begin(&mut self) -> HookResult<()> {
        Ok(())
    }

    fn before_save(&mut self, _global_step: u64) -> HookResult<()> {
        Ok(())
    }

    /// Called after a checkpoint for `global_step` was written to `path`.
    /// Returning [`HookAction::Stop`] ends training.
    fn after_save(&mut self, global_step: u64, path: &Path) -> HookResult<HookAction>;

    fn end(&mut self, _global_step: u64) -> HookResult<()> {
        Ok(())
    }
}

/// Saves a checkpoint at the start of training, every `save_steps` global
/// steps, and at the end.
pub struct CheckpointSaverHook {
    manager: CheckpointManager<JsonCheckpointer>,
    save_steps: u64,
    last_saved_step: Option<u64>,
    listeners: Vec<Box<dyn CheckpointSaverListener>>,
}

impl std::fmt::Debug for CheckpointSaverHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointSaverHook")
            .field("checkpoint_dir", &self.manager.checkpoint_dir())
            .field("save_steps", &self.save_steps)
            .field("last_saved_step", &self.last_saved_step)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl CheckpointSaverHook {
    pub fn new(model_dir: impl Into<PathBuf>, save_steps: u64, max_to_keep: usize) -> Self {
        let config = CheckpointConfig::new(model_dir).with_max_to_keep(max_to_keep);
        Self {
            manager: CheckpointManager::new(config, JsonCheckpointer::new()),
            save_steps: save_steps.max(1),
            last_saved_step: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Box<dyn CheckpointSaverListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn last_saved_step(&self) -> Option<u64> {
        self.last_saved_step
    }

    fn save(&mut self, vars: &VariableStore) -> HookResult<HookAction> {
        let step = vars.global_step();
        for listener in &mut self.listeners {
            listener.before_save(step)?;
        }
        let info = self.manager.save(&vars.to_model_state())?;
        self.last_saved_step = Some(step);

        let mut action = HookAction::Continue;
        for listener in &mut self.listeners {
            if listener.after_save(step, &info.path)? == HookAction::Stop {
                info!(global_step = step, "Checkpoint listener requested stop");
                action = HookAction::Stop;
            }
        }
        Ok(action)
    }
}

impl Hook for CheckpointSaverHook {
    fn name(&self) -> &str {
        "checkpoint_saver_hook"
    }

    fn begin(&mut self, vars: &VariableStore) -> HookResult<()> {
        self.manager.initialize()?;
        for listener in &mut self.listeners {
            listener.begin()?;
        }
        let step = vars.global_step();
        let already_saved = self
            .manager
            .list_checkpoints()
            .last()
            .is_some_and(|c| c.global_step == step);
        if already_saved {
            self.last_saved_step = Some(step);
        } else {
            self.save(vars)?;
        }
        Ok(())
    }

    fn after_step(&mut self, ctx: &StepContext<'_>) -> HookResult<HookAction> {
        let due = match self.last_saved_step {
            Some(last) => ctx.global_step >= last.saturating_add(self.save_steps),
            None => true,
        };
        if due {
            return self.save(ctx.vars);
        }
        Ok(HookAction::Continue)
    }

    fn end(&mut self, vars: &VariableStore, _metrics: Option<&Metrics>) -> HookResult<()> {
        let step = vars.global_step();
        if self.last_saved_step != Some(step) {
            self.save(vars)?;
        }
        for listener in &mut self.listeners {
            listener.end(step)?;
        }
        Ok(())
    }
}

/// Whether training should stop because `metric_name` has not decreased
/// for `max_steps_without_decrease` steps.
///
/// Walks the records in step order, ignoring steps below `min_steps`, and
/// tracks the lowest value seen. Fires as soon as some record is at least
/// `max_steps_without_decrease` steps after the best one.
pub fn no_decrease_in(
    records: &[EvalRecord],
    metric_name: &str,
    max_steps_without_decrease: u64,
    min_steps: u64,
) -> HookResult<bool> {
    let mut best: Option<(f64, u64)> = None;
    for record in records {
        if record.global_step < min_steps {
            continue;
        }
        let value = *record.metrics.get(metric_name).ok_or_else(|| {
            HookError::Custom(format!(
                "metric {metric_name} missing from evaluation at step {}",
                record.global_step
            ))
        })?;
        let best_step = match best {
            Some((best_value, step)) if value >= best_value => step,
            _ => {
                best = Some((value, record.global_step));
                record.global_step
            }
        };
        if record.global_step - best_step >= max_steps_without_decrease {
            debug!(
                metric = metric_name,
                best_step,
                global_step = record.global_step,
                "No decrease found"
            );
            return Ok(true);
        }
    }
    Ok(false)
}

/// Stops training when an evaluation metric stops decreasing.
#[derive(Debug)]
pub struct StopIfNoDecreaseHook {
    history: Arc<EvalHistory>,
    metric_name: String,
    max_steps_without_decrease: u64,
    min_steps: u64,
    timer: StepTimer,
}

/// Early-stopping hook over the evaluation history of an estimator.
///
/// Defaults: `min_steps = 0`, checked at most every 60 seconds.
pub fn stop_if_no_decrease_hook(
    history: Arc<EvalHistory>,
    metric_name: impl Into<String>,
    max_steps_without_decrease: u64,
) -> StopIfNoDecreaseHook {
    StopIfNoDecreaseHook {
        history,
        metric_name: metric_name.into(),
        max_steps_without_decrease,
        min_steps: 0,
        timer: StepTimer::new(Trigger::Secs(60)),
    }
}

impl StopIfNoDecreaseHook {
    pub fn with_min_steps(mut self, min_steps: u64) -> Self {
        self.min_steps = min_steps;
        self
    }

    pub fn with_run_every_secs(mut self, secs: u64) -> Self {
        self.timer = StepTimer::new(Trigger::Secs(secs));
        self
    }

    pub fn with_run_every_steps(mut self, steps: u64) -> Self {
        self.timer = StepTimer::new(Trigger::Steps(steps.max(1)));
        self
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn max_steps_without_decrease(&self) -> u64 {
        self.max_steps_without_decrease
    }

    pub fn should_stop(&self) -> HookResult<bool> {
        no_decrease_in(
            &self.history.records(),
            &self.metric_name,
            self.max_steps_without_decrease,
            self.min_steps,
        )
    }
}

impl Hook for StopIfNoDecreaseHook {
    fn name(&self) -> &str {
        "stop_if_no_decrease_hook"
    }

    fn after_step(&mut self, ctx: &StepContext<'_>) -> HookResult<HookAction> {
        if !self.timer.should_trigger_for_step(ctx.global_step) {
            return Ok(HookAction::Continue);
        }
        self.timer.update_last_triggered_step(ctx.global_step);
        if self.should_stop()? {
            info!(
                global_step = ctx.global_step,
                metric = %self.metric_name,
                max_steps_without_decrease = self.max_steps_without_decrease,
                "Requesting early stop: metric did not decrease"
            );
            return Ok(HookAction::Stop);
        }
        Ok(HookAction::Continue)
    }
}

#[derive(Default)]
pub struct HookList {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<H: Hook + 'static>(&mut self, hook: H) {
        self.hooks.push(Box::new(hook));
    }

    pub fn push(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn begin(&mut self, vars: &VariableStore) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.begin(vars)?;
        }
        Ok(())
    }

    pub fn before_step(&mut self, global_step: u64) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.before_step(global_step)?;
        }
        Ok(())
    }

    /// Runs every hook; stops if any of them asks to.
    pub fn after_step(&mut self, ctx: &StepContext<'_>) -> HookResult<HookAction> {
        let mut action = HookAction::Continue;
        for hook in &mut self.hooks {
            if hook.after_step(ctx)? == HookAction::Stop {
                debug!(hook = hook.name(), "Hook requested stop");
                action = HookAction::Stop;
            }
        }
        Ok(action)
    }

    pub fn end(&mut self, vars: &VariableStore, metrics: Option<&Metrics>) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.end(vars, metrics)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn record(step: u64, loss: f64) -> EvalRecord {
        EvalRecord {
            global_step: step,
            metrics: BTreeMap::from([("loss".to_string(), loss)]),
        }
    }

    fn ctx<'a>(step: u64, metrics: &'a Metrics, vars: &'a VariableStore) -> StepContext<'a> {
        StepContext {
            global_step: step,
            metrics,
            vars,
        }
    }

    #[test]
    fn test_no_decrease_fires_exactly_at_threshold() {
        let mut records = vec![record(0, 0.7), record(1000, 0.5), record(1500, 0.55)];
        assert!(!no_decrease_in(&records, "loss", 1000, 0).unwrap());

        records.push(record(1999, 0.6));
        assert!(!no_decrease_in(&records, "loss", 1000, 0).unwrap());

        records.push(record(2000, 0.6));
        assert!(no_decrease_in(&records, "loss", 1000, 0).unwrap());
    }

    #[test]
    fn test_no_decrease_equal_value_is_not_a_decrease() {
        let records = vec![record(100, 0.5), record(1100, 0.5)];
        assert!(no_decrease_in(&records, "loss", 1000, 0).unwrap());
    }

    #[test]
    fn test_no_decrease_respects_min_steps() {
        let records = vec![record(0, 0.1), record(1000, 0.5), record(1500, 0.4)];
        assert!(no_decrease_in(&records, "loss", 1000, 0).unwrap());
        assert!(!no_decrease_in(&records, "loss", 1000, 500).unwrap());
    }

    #[test]
    fn test_no_decrease_missing_metric() {
        let records = vec![record(0, 0.1)];
        assert!(no_decrease_in(&records, "auc", 10, 0).is_err());
    }

    #[test]
    fn test_stop_hook_reads_shared_history() {
        let dir = tempdir().unwrap();
        let history = Arc::new(EvalHistory::open(dir.path()).unwrap());
        let mut hook = stop_if_no_decrease_hook(history.clone(), "loss", 100).with_run_every_steps(1);
        let vars = VariableStore::new(0);
        let metrics = Metrics::new(0.5, 0);

        history.append(record(10, 0.3)).unwrap();
        assert_eq!(hook.after_step(&ctx(10, &metrics, &vars)).unwrap(), HookAction::Continue);

        history.append(record(110, 0.4)).unwrap();
        assert_eq!(hook.after_step(&ctx(110, &metrics, &vars)).unwrap(), HookAction::Stop);
    }

    #[test]
    fn test_step_timer() {
        let mut timer = StepTimer::new(Trigger::Steps(10));
        assert!(timer.should_trigger_for_step(3));
        assert!(timer.update_last_triggered_step(3).is_none());
        assert!(!timer.should_trigger_for_step(3));
        assert!(!timer.should_trigger_for_step(12));
        assert!(timer.should_trigger_for_step(13));
        assert_eq!(timer.update_last_triggered_step(13).map(|(_, s)| s), Some(10));

        let mut timer = StepTimer::new(Trigger::Secs(3600));
        timer.update_last_triggered_step(0);
        assert!(!timer.should_trigger_for_step(1_000_000));
    }

    #[test]
    fn test_logging_hook_never_stops() {
        let mut hook = LoggingHook::new(10);
        let vars = VariableStore::new(0);
        let metrics = Metrics::new(0.5, 0);
        for step in 1..=25 {
            assert_eq!(hook.after_step(&ctx(step, &metrics, &vars)).unwrap(), HookAction::Continue);
        }
        hook.end(&vars, Some(&metrics)).unwrap();
    }

    #[test]
    fn test_huge_intervals_do_not_overflow() {
        let mut timer = StepTimer::new(Trigger::Steps(u64::MAX));
        timer.update_last_triggered_step(1);
        assert!(!timer.should_trigger_for_step(2));
        assert!(!timer.should_trigger_for_step(u64::MAX - 1));

        let mut hook = LoggingHook::new(u64::MAX);
        let vars = VariableStore::new(0);
        let metrics = Metrics::new(0.5, 0);
        for step in 1..=3 {
            assert_eq!(hook.after_step(&ctx(step, &metrics, &vars)).unwrap(), HookAction::Continue);
        }

        let dir = tempdir().unwrap();
        let saved = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut saver = CheckpointSaverHook::new(dir.path(), u64::MAX, 5)
            .with_listener(Box::new(Recorder(saved.clone())));
        let mut vars = VariableStore::new(0);
        saver.begin(&vars).unwrap();
        for _ in 0..5 {
            let step = vars.increment_global_step();
            saver.after_step(&ctx(step, &metrics, &vars)).unwrap();
        }
        assert_eq!(*saved.lock(), vec![0]);
    }

    struct Recorder(Arc<parking_lot::Mutex<Vec<u64>>>);

    impl CheckpointSaverListener for Recorder {
        fn after_save(&mut self, global_step: u64, path: &Path) -> HookResult<HookAction> {
            assert!(path.exists());
            self.0.lock().push(global_step);
            Ok(HookAction::Continue)
        }
    }

    #[test]
    fn test_checkpoint_saver_schedule_and_retention() {
        let dir = tempdir().unwrap();
        let saved = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut hook = CheckpointSaverHook::new(dir.path(), 100, 2)
            .with_listener(Box::new(Recorder(saved.clone())));
        let mut vars = VariableStore::new(0);
        let metrics = Metrics::new(0.5, 0);

        hook.begin(&vars).unwrap();
        for _ in 0..250 {
            let step = vars.increment_global_step();
            hook.after_step(&ctx(step, &metrics, &vars)).unwrap();
        }
        hook.end(&vars, None).unwrap();

        assert_eq!(*saved.lock(), vec![0, 100, 200, 250]);
        let mut files: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["checkpoint-200.json", "checkpoint-250.json"]);
    }

    #[test]
    fn test_checkpoint_saver_skips_initial_save_when_resuming() {
        let dir = tempdir().unwrap();
        let mut vars = VariableStore::new(0);
        let mut first = CheckpointSaverHook::new(dir.path(), 10, 5);
        first.begin(&vars).unwrap();
        assert_eq!(first.last_saved_step(), Some(0));

        for _ in 0..10 {
            vars.increment_global_step();
        }
        first.end(&vars, None).unwrap();

        let saved = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut second =
            CheckpointSaverHook::new(dir.path(), 10, 5).with_listener(Box::new(Recorder(saved.clone())));
        second.begin(&vars).unwrap();
        assert_eq!(second.last_saved_step(), Some(10));
        assert!(saved.lock().is_empty());
    }
}
