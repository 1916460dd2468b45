//! Training orchestration for deeprec.
//!
//! - **Estimator**: train, evaluate and predict with a [`ModelFn`]; local
//!   [`train_and_evaluate`] with an evaluation after every checkpoint
//! - **Variables**: a [`VariableStore`] of named, collection-tagged tensors
//!   with per-optimizer slot state
//! - **Train ops**: optimizer steps restricted to a variable list, grouped
//!   with the global-step update
//! - **Hooks**: logging, checkpoint saving and early stopping
//! - **Metrics**: log-loss and streaming AUC
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Estimator                         │
//! │  ┌──────────┐  ┌──────────┐  ┌───────────────────────┐   │
//! │  │ ModelFn  │  │  Hooks   │  │ Session (vars, pools) │   │
//! │  └──────────┘  └──────────┘  └───────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!            ┌───────────────┼───────────────┐
//!            ▼               ▼               ▼
//!         train()        evaluate()      predict()
//! ```

pub mod estimator;
pub mod eval_history;
pub mod hooks;
pub mod metrics;
pub mod run_config;
pub mod session;
pub mod train_op;
pub mod variables;

pub use estimator::{
    train_and_evaluate, Estimator, EstimatorError, EstimatorMode, EstimatorResult,
    EstimatorSpec, EvalResult, EvalSpec, ModelFn, PredictResult, TrainResult, TrainSpec,
};
pub use eval_history::{EvalHistory, EvalRecord};
pub use hooks::{
    no_decrease_in, stop_if_no_decrease_hook, CheckpointSaverHook, CheckpointSaverListener, Hook,
    HookAction, HookError, HookList, HookResult, LoggingHook, StepContext, StepTimer,
    StopIfNoDecreaseHook, Trigger,
};
pub use metrics::{
    log_loss, log_loss_gradient, MetricOp, Metrics, MetricsRecorder, StreamingAuc,
};
pub use run_config::{RunConfig, RunConfigError, SessionConfig};
pub use session::{Session, ThreadPools};
pub use train_op::{Gradients, OptimizerStep, TrainOp, UpdateOp};
pub use variables::{Variable, VariableStore};
