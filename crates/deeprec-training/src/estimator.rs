//! Estimator pattern for training orchestration.
//!
//! A [`ModelFn`] describes one step of the model for a batch: predictions in
//! predict mode, loss and metric ops in eval mode, loss and a [`TrainOp`] in
//! train mode. The [`Estimator`] owns everything around it: sessions,
//! checkpoints, hooks and the evaluation history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deeprec_checkpoint::{CheckpointError, Checkpointer, JsonCheckpointer};
use deeprec_core::{CoreError, Features};
use deeprec_data::{DataError, InputFn};
use deeprec_layers::LayerError;
use deeprec_optimizer::OptimizerError;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::eval_history::{EvalHistory, EvalRecord};
use crate::hooks::{
    CheckpointSaverHook, CheckpointSaverListener, Hook, HookAction, HookError, HookList,
    HookResult, LoggingHook, StepContext,
};
use crate::metrics::{MetricOp, Metrics, MetricsRecorder};
use crate::run_config::{RunConfig, RunConfigError};
use crate::session::{Session, ThreadPools};
use crate::train_op::TrainOp;
use crate::variables::VariableStore;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("Run config error: {0}")]
    RunConfig(#[from] RunConfigError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Layer error: {0}")]
    Layer(#[from] LayerError),

    #[error("Feature error: {0}")]
    Feature(#[from] CoreError),

    #[error("Input error: {0}")]
    Data(#[from] DataError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("No checkpoint found in {0}")]
    NoCheckpoint(PathBuf),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Variable {name} has shape {actual:?}, expected {expected:?}")]
    VariableShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid EstimatorSpec for {mode:?}: {message}")]
    InvalidSpec { mode: EstimatorMode, message: String },

    #[error("Labels are required in {0:?} mode")]
    MissingLabels(EstimatorMode),

    #[error("Loss is not finite at global step {global_step}")]
    NanLoss { global_step: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Input produced no batches for {0:?}")]
    EmptyInput(EstimatorMode),

    #[error("Model error: {0}")]
    Model(String),
}

pub type EstimatorResult<T> = Result<T, EstimatorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorMode {
    Train,
    Eval,
    Predict,
}

/// What a model function returns for one batch.
#[derive(Debug, Clone)]
pub struct EstimatorSpec {
    pub mode: EstimatorMode,
    pub predictions: BTreeMap<String, Vec<f32>>,
    pub loss: Option<f32>,
    pub eval_metric_ops: BTreeMap<String, MetricOp>,
    pub train_op: Option<TrainOp>,
}

impl EstimatorSpec {
    pub fn for_predict(predictions: BTreeMap<String, Vec<f32>>) -> Self {
        Self {
            mode: EstimatorMode::Predict,
            predictions,
            loss: None,
            eval_metric_ops: BTreeMap::new(),
            train_op: None,
        }
    }

    pub fn for_eval(loss: f32, eval_metric_ops: BTreeMap<String, MetricOp>) -> Self {
        Self {
            mode: EstimatorMode::Eval,
            predictions: BTreeMap::new(),
            loss: Some(loss),
            eval_metric_ops,
            train_op: None,
        }
    }

    pub fn for_train(loss: f32, train_op: TrainOp) -> Self {
        Self {
            mode: EstimatorMode::Train,
            predictions: BTreeMap::new(),
            loss: Some(loss),
            eval_metric_ops: BTreeMap::new(),
            train_op: Some(train_op),
        }
    }

    pub fn with_predictions(mut self, predictions: BTreeMap<String, Vec<f32>>) -> Self {
        self.predictions = predictions;
        self
    }

    /// Checks that the fields required by `mode` are present.
    pub fn validate(&self) -> EstimatorResult<()> {
        let invalid = |message: &str| {
            Err(EstimatorError::InvalidSpec {
                mode: self.mode,
                message: message.to_string(),
            })
        };
        match self.mode {
            EstimatorMode::Train if self.loss.is_none() => invalid("missing loss"),
            EstimatorMode::Train if self.train_op.is_none() => invalid("missing train_op"),
            EstimatorMode::Eval if self.loss.is_none() => invalid("missing loss"),
            EstimatorMode::Predict if self.predictions.is_empty() => invalid("missing predictions"),
            _ => Ok(()),
        }
    }
}

/// The model: called once per batch with the session holding its variables.
pub trait ModelFn: Send + Sync {
    fn call(
        &self,
        features: &[Features],
        labels: Option<&[f32]>,
        mode: EstimatorMode,
        session: &mut Session,
    ) -> EstimatorResult<EstimatorSpec>;
}

impl<F> ModelFn for F
where
    F: Fn(&[Features], Option<&[f32]>, EstimatorMode, &mut Session) -> EstimatorResult<EstimatorSpec>
        + Send
        + Sync,
{
    fn call(
        &self,
        features: &[Features],
        labels: Option<&[f32]>,
        mode: EstimatorMode,
        session: &mut Session,
    ) -> EstimatorResult<EstimatorSpec> {
        self(features, labels, mode, session)
    }
}

#[derive(Debug, Clone)]
pub struct TrainResult {
    pub global_step: u64,
    pub final_metrics: Option<Metrics>,
    pub stopped_early: bool,
}

#[derive(Debug, Clone)]
pub struct EvalResult {
    pub global_step: u64,
    pub metrics: Metrics,
    pub eval_steps: u64,
    pub checkpoint_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct PredictResult {
    pub predictions: BTreeMap<String, Vec<f32>>,
    pub num_examples: usize,
}

impl PredictResult {
    pub fn get(&self, key: &str) -> Option<&[f32]> {
        self.predictions.get(key).map(Vec::as_slice)
    }
}

/// Trains, evaluates and predicts with a [`ModelFn`].
///
/// Cloning is cheap: clones share the model function, thread pools and
/// evaluation history.
#[derive(Clone)]
pub struct Estimator {
    model_fn: Arc<dyn ModelFn>,
    config: RunConfig,
    model_dir: PathBuf,
    seed: u64,
    pools: ThreadPools,
    eval_history: Arc<EvalHistory>,
}

impl std::fmt::Debug for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Estimator")
            .field("config", &self.config)
            .field("model_dir", &self.model_dir)
            .field("seed", &self.seed)
            .finish()
    }
}

impl Estimator {
    pub fn new<M: ModelFn + 'static>(model_fn: M, config: RunConfig) -> EstimatorResult<Self> {
        Self::from_arc(Arc::new(model_fn), config)
    }

    /// Resolves the model directory (a temporary one when unset), creates
    /// it, and builds the session thread pools.
    pub fn from_arc(model_fn: Arc<dyn ModelFn>, mut config: RunConfig) -> EstimatorResult<Self> {
        config.validate()?;
        let model_dir = config.resolve_model_dir()?;
        std::fs::create_dir_all(&model_dir).map_err(|source| EstimatorError::Io {
            path: model_dir.clone(),
            source,
        })?;
        config.model_dir = Some(model_dir.clone());

        let pools = ThreadPools::new(&config.session_config)?;
        let eval_history = Arc::new(EvalHistory::open(model_dir.join("eval"))?);
        let seed = config.seed();
        info!(
            model_dir = %model_dir.display(),
            seed,
            save_checkpoints_steps = config.save_checkpoints_steps,
            keep_checkpoint_max = config.keep_checkpoint_max,
            "Using config"
        );
        Ok(Self {
            model_fn,
            config,
            model_dir,
            seed,
            pools,
            eval_history,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn eval_dir(&self) -> PathBuf {
        self.model_dir.join("eval")
    }

    pub fn eval_history(&self) -> Arc<EvalHistory> {
        Arc::clone(&self.eval_history)
    }

    pub fn latest_checkpoint(&self) -> Option<PathBuf> {
        JsonCheckpointer::new().latest(&self.model_dir)
    }

    fn new_session(&self) -> Session {
        Session::new(VariableStore::new(self.seed), self.pools.clone())
    }

    fn restore_session(&self, path: &Path) -> EstimatorResult<Session> {
        let state = JsonCheckpointer::new().restore(path)?;
        let mut session = self.new_session();
        session.vars_mut().restore(&state)?;
        Ok(session)
    }

    /// Trains until `steps` more steps, `max_steps` total steps, the end of
    /// the input, or a hook asks to stop. Resumes from the latest
    /// checkpoint in the model directory.
    pub fn train(
        &self,
        input_fn: &dyn InputFn,
        hooks: Vec<Box<dyn Hook>>,
        steps: Option<u64>,
        max_steps: Option<u64>,
    ) -> EstimatorResult<TrainResult> {
        self.train_with_listeners(input_fn, hooks, steps, max_steps, Vec::new())
    }

    pub(crate) fn train_with_listeners(
        &self,
        input_fn: &dyn InputFn,
        hooks: Vec<Box<dyn Hook>>,
        steps: Option<u64>,
        max_steps: Option<u64>,
        listeners: Vec<Box<dyn CheckpointSaverListener>>,
    ) -> EstimatorResult<TrainResult> {
        if steps.is_some() && max_steps.is_some() {
            return Err(EstimatorError::InvalidArgument(
                "can not provide both steps and max_steps".into(),
            ));
        }
        if steps == Some(0) || max_steps == Some(0) {
            return Err(EstimatorError::InvalidArgument(
                "steps and max_steps must be positive".into(),
            ));
        }

        let mut session = match self.latest_checkpoint() {
            Some(path) => {
                let session = self.restore_session(&path)?;
                info!(
                    path = %path.display(),
                    global_step = session.vars().global_step(),
                    "Restoring parameters from checkpoint"
                );
                session
            }
            None => self.new_session(),
        };

        let start = session.vars().global_step();
        if let Some(max) = max_steps {
            if start >= max {
                info!(global_step = start, max_steps = max, "Skipping training since max_steps has already saved");
                return Ok(TrainResult {
                    global_step: start,
                    final_metrics: None,
                    stopped_early: false,
                });
            }
        }
        let target = match (steps, max_steps) {
            (Some(s), _) => start.saturating_add(s),
            (None, Some(m)) => m,
            (None, None) => u64::MAX,
        };

        let mut saver = CheckpointSaverHook::new(
            &self.model_dir,
            self.config.save_checkpoints_steps,
            self.config.keep_checkpoint_max,
        );
        for listener in listeners {
            saver = saver.with_listener(listener);
        }
        let mut hook_list = HookList::new();
        hook_list.add(LoggingHook::new(self.config.log_step_count_steps));
        for hook in hooks {
            hook_list.push(hook);
        }
        hook_list.add(saver);

        hook_list.begin(session.vars())?;
        let mut batches = input_fn.batches()?;
        let mut last_metrics: Option<Metrics> = None;
        let mut stopped_early = false;

        while session.vars().global_step() < target {
            let Some(batch) = batches.next() else {
                info!(global_step = session.vars().global_step(), "Input exhausted");
                break;
            };
            hook_list.before_step(session.vars().global_step())?;

            let (features, labels) = batch.into_parts();
            let spec = self
                .model_fn
                .call(&features, Some(labels.as_slice()), EstimatorMode::Train, &mut session)?;
            spec.validate()?;
            let (Some(loss), Some(train_op)) = (spec.loss, spec.train_op) else {
                return Err(EstimatorError::InvalidSpec {
                    mode: EstimatorMode::Train,
                    message: "missing loss or train_op".into(),
                });
            };
            if !loss.is_finite() {
                return Err(EstimatorError::NanLoss {
                    global_step: session.vars().global_step(),
                });
            }

            let global_step = train_op.run(session.vars_mut())?;
            let metrics = Metrics::new(f64::from(loss), global_step);
            let action = hook_list.after_step(&StepContext {
                global_step,
                metrics: &metrics,
                vars: session.vars(),
            })?;
            last_metrics = Some(metrics);
            if action == HookAction::Stop {
                info!(global_step, "Training stopped by hook");
                stopped_early = true;
                break;
            }
        }

        hook_list.end(session.vars(), last_metrics.as_ref())?;
        Ok(TrainResult {
            global_step: session.vars().global_step(),
            final_metrics: last_metrics,
            stopped_early,
        })
    }

    /// Evaluates a checkpoint (the latest one by default) over `steps`
    /// batches, or the whole input when `steps` is `None`, and appends the
    /// result to the evaluation history.
    pub fn evaluate(
        &self,
        input_fn: &dyn InputFn,
        steps: Option<u64>,
        checkpoint_path: Option<&Path>,
    ) -> EstimatorResult<EvalResult> {
        let path = match checkpoint_path {
            Some(path) => path.to_path_buf(),
            None => self
                .latest_checkpoint()
                .ok_or_else(|| EstimatorError::NoCheckpoint(self.model_dir.clone()))?,
        };
        let mut session = self.restore_session(&path)?;
        let global_step = session.vars().global_step();
        info!(path = %path.display(), global_step, "Starting evaluation");
        let started = Instant::now();

        let mut recorder = MetricsRecorder::new();
        let limit = steps.unwrap_or(u64::MAX);
        for batch in input_fn.batches()? {
            if recorder.count() >= limit {
                break;
            }
            let (features, labels) = batch.into_parts();
            let spec = self
                .model_fn
                .call(&features, Some(labels.as_slice()), EstimatorMode::Eval, &mut session)?;
            spec.validate()?;
            let loss = spec.loss.ok_or_else(|| EstimatorError::InvalidSpec {
                mode: EstimatorMode::Eval,
                message: "missing loss".into(),
            })?;
            recorder.record_loss(f64::from(loss));
            recorder.record_ops(&spec.eval_metric_ops);
        }
        if recorder.count() == 0 {
            return Err(EstimatorError::EmptyInput(EstimatorMode::Eval));
        }

        let metrics = recorder.aggregate(global_step);
        self.eval_history.append(EvalRecord {
            global_step,
            metrics: metrics.to_map(),
        })?;
        info!(
            global_step,
            loss = metrics.loss,
            metrics = ?metrics.values,
            batches = recorder.count(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Finished evaluation"
        );
        Ok(EvalResult {
            global_step,
            metrics,
            eval_steps: recorder.count(),
            checkpoint_path: path,
        })
    }

    /// Runs the model in predict mode over the whole input, which must be
    /// finite, using the latest checkpoint.
    pub fn predict(&self, input_fn: &dyn InputFn) -> EstimatorResult<PredictResult> {
        let path = self
            .latest_checkpoint()
            .ok_or_else(|| EstimatorError::NoCheckpoint(self.model_dir.clone()))?;
        let mut session = self.restore_session(&path)?;

        let mut result = PredictResult::default();
        for batch in input_fn.batches()? {
            let (features, _) = batch.into_parts();
            let spec = self
                .model_fn
                .call(&features, None, EstimatorMode::Predict, &mut session)?;
            spec.validate()?;
            for (key, values) in spec.predictions {
                result.predictions.entry(key).or_default().extend(values);
            }
            result.num_examples += features.len();
        }
        debug!(num_examples = result.num_examples, "Finished prediction");
        Ok(result)
    }
}

/// Training half of [`train_and_evaluate`].
pub struct TrainSpec {
    pub input_fn: Arc<dyn InputFn>,
    pub max_steps: Option<u64>,
    pub hooks: Vec<Box<dyn Hook>>,
}

impl TrainSpec {
    pub fn new(input_fn: Arc<dyn InputFn>) -> Self {
        Self {
            input_fn,
            max_steps: None,
            hooks: Vec::new(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_hook(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }
}

/// Evaluation half of [`train_and_evaluate`].
#[derive(Clone)]
pub struct EvalSpec {
    pub input_fn: Arc<dyn InputFn>,
    /// Batches per evaluation; `None` evaluates the whole input.
    pub steps: Option<u64>,
    /// No evaluation runs until this long after training starts.
    pub start_delay_secs: u64,
    /// Minimum time between two evaluations.
    pub throttle_secs: u64,
}

impl EvalSpec {
    pub fn new(input_fn: Arc<dyn InputFn>) -> Self {
        Self {
            input_fn,
            steps: Some(100),
            start_delay_secs: 120,
            throttle_secs: 600,
        }
    }

    pub fn with_steps(mut self, steps: Option<u64>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_start_delay_secs(mut self, secs: u64) -> Self {
        self.start_delay_secs = secs;
        self
    }

    pub fn with_throttle_secs(mut self, secs: u64) -> Self {
        self.throttle_secs = secs;
        self
    }
}

/// Evaluates every new checkpoint, subject to the eval spec's delays.
struct EvaluateOnSave {
    estimator: Estimator,
    spec: EvalSpec,
    started: Instant,
    last_eval: Option<Instant>,
    last_result: Arc<Mutex<Option<EvalResult>>>,
}

impl CheckpointSaverListener for EvaluateOnSave {
    fn begin(&mut self) -> HookResult<()> {
        self.started = Instant::now();
        Ok(())
    }

    fn after_save(&mut self, global_step: u64, path: &Path) -> HookResult<HookAction> {
        if self.started.elapsed() < Duration::from_secs(self.spec.start_delay_secs) {
            debug!(global_step, "Skipping evaluation during start delay");
            return Ok(HookAction::Continue);
        }
        if let Some(last) = self.last_eval {
            if last.elapsed() < Duration::from_secs(self.spec.throttle_secs) {
                debug!(global_step, "Skipping evaluation within throttle window");
                return Ok(HookAction::Continue);
            }
        }
        let result = self
            .estimator
            .evaluate(self.spec.input_fn.as_ref(), self.spec.steps, Some(path))
            .map_err(|e| HookError::Evaluation(Box::new(e)))?;
        self.last_eval = Some(Instant::now());
        *self.last_result.lock() = Some(result);
        Ok(HookAction::Continue)
    }
}

/// Trains with an evaluation after each checkpoint save, then makes sure
/// the final checkpoint is evaluated. Returns the last evaluation.
pub fn train_and_evaluate(
    estimator: &Estimator,
    train_spec: TrainSpec,
    eval_spec: EvalSpec,
) -> EstimatorResult<EvalResult> {
    let last_result = Arc::new(Mutex::new(None));
    let listener = EvaluateOnSave {
        estimator: estimator.clone(),
        spec: eval_spec.clone(),
        started: Instant::now(),
        last_eval: None,
        last_result: Arc::clone(&last_result),
    };

    info!(
        max_steps = ?train_spec.max_steps,
        throttle_secs = eval_spec.throttle_secs,
        "Running training and evaluation locally"
    );
    let train_result = estimator.train_with_listeners(
        train_spec.input_fn.as_ref(),
        train_spec.hooks,
        None,
        train_spec.max_steps,
        vec![Box::new(listener)],
    )?;

    let last = last_result.lock().take();
    match last {
        Some(result) if result.global_step == train_result.global_step => Ok(result),
        _ => {
            info!(global_step = train_result.global_step, "Evaluating final checkpoint");
            estimator.evaluate(eval_spec.input_fn.as_ref(), eval_spec.steps, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train_op::UpdateOp;

    #[test]
    fn test_spec_validation() {
        assert!(EstimatorSpec::for_eval(0.5, BTreeMap::new()).validate().is_ok());
        assert!(EstimatorSpec::for_train(0.5, TrainOp::group(vec![UpdateOp::IncrementGlobalStep], vec![]))
            .validate()
            .is_ok());
        assert!(matches!(
            EstimatorSpec::for_predict(BTreeMap::new()).validate(),
            Err(EstimatorError::InvalidSpec {
                mode: EstimatorMode::Predict,
                ..
            })
        ));

        let mut spec = EstimatorSpec::for_eval(0.5, BTreeMap::new());
        spec.loss = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_predict_spec_has_only_predictions() {
        let spec = EstimatorSpec::for_predict(BTreeMap::from([(
            "predictions".to_string(),
            vec![0.2, 0.7],
        )]));
        assert_eq!(spec.mode, EstimatorMode::Predict);
        assert!(spec.loss.is_none());
        assert!(spec.eval_metric_ops.is_empty());
        assert!(spec.train_op.is_none());
    }

    #[test]
    fn test_eval_spec_defaults() {
        let input: Arc<dyn InputFn> = Arc::new(deeprec_data::DatasetInput::once(Arc::new(Vec::new()), 1));
        let spec = EvalSpec::new(input)
            .with_steps(None)
            .with_start_delay_secs(0)
            .with_throttle_secs(0);
        assert_eq!(spec.steps, None);
        assert_eq!(spec.throttle_secs, 0);
    }

    #[test]
    fn test_error_messages() {
        let err = EstimatorError::NoCheckpoint(PathBuf::from("/tmp/m"));
        assert_eq!(err.to_string(), "No checkpoint found in /tmp/m");
        let err = EstimatorError::Hook(HookError::Evaluation(Box::new(EstimatorError::EmptyInput(
            EstimatorMode::Eval,
        ))));
        assert!(err.to_string().contains("Evaluation failed"));
    }
}
