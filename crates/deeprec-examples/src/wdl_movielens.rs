//! Wide-and-deep ranking on MovieLens.
//!
//! Wires the MovieLens feature columns to a [`Wdl`] model and trains it with
//! [`train_and_evaluate`]: FTRL on the wide part, Adam on the deep part, an
//! evaluation after every checkpoint, and early stopping once the eval loss
//! has not improved for 1000 steps.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use deeprec_core::graph_keys::{DEEP, WIDE};
use deeprec_core::{
    CategoricalColumn, CrossedColumn, EmbeddingColumn, FeatureColumn, Features, IndicatorColumn,
};
use deeprec_data::{InputFn, MovielensRanking};
use deeprec_models::Wdl;
use deeprec_optimizer::OptimizerConfig;
use deeprec_training::{
    log_loss, log_loss_gradient, stop_if_no_decrease_hook, train_and_evaluate, Estimator,
    EstimatorError, EstimatorMode, EstimatorResult, EstimatorSpec, EvalResult, EvalSpec, MetricOp,
    ModelFn, OptimizerStep, RunConfig, Session, SessionConfig, TrainOp, TrainSpec, UpdateOp,
};
use tracing::info;

pub const EMBEDDING_DIMENSION: usize = 16;
pub const HIDDEN_UNITS: [usize; 2] = [64, 16];

pub const FTRL_LEARNING_RATE: f32 = 0.01;
pub const FTRL_L1: f32 = 0.5;
pub const ADAM_LEARNING_RATE: f32 = 0.01;

/// Steps without a lower eval loss before training stops.
pub const MAX_STEPS_WITHOUT_DECREASE: u64 = 1000;

fn base_columns(dataset: &MovielensRanking) -> Vec<CategoricalColumn> {
    vec![
        CategoricalColumn::hash_bucket("user_id", dataset.num_users()),
        CategoricalColumn::vocabulary_list("user_gender", dataset.gender_vocab()),
        CategoricalColumn::vocabulary_list("user_age", dataset.age_vocab()),
        CategoricalColumn::vocabulary_list("user_occupation", dataset.occupation_vocab()),
        CategoricalColumn::hash_bucket("movie_id", dataset.num_movies()),
        CategoricalColumn::vocabulary_list("movie_genres", dataset.genres_vocab()),
    ]
}

/// Indicator and embedding columns over the six raw fields, in field order.
pub fn build_columns(dataset: &MovielensRanking) -> (Vec<FeatureColumn>, Vec<FeatureColumn>) {
    base_columns(dataset)
        .into_iter()
        .map(|column| {
            (
                FeatureColumn::from(IndicatorColumn::new(column.clone())),
                FeatureColumn::from(EmbeddingColumn::new(column, EMBEDDING_DIMENSION)),
            )
        })
        .unzip()
}

/// Indicator columns over the gender x age, gender x occupation and
/// age x occupation crosses.
pub fn cross_product_transformation() -> Vec<FeatureColumn> {
    [
        (["user_gender", "user_age"], 14),
        (["user_gender", "user_occupation"], 40),
        (["user_age", "user_occupation"], 140),
    ]
    .into_iter()
    .map(|(keys, buckets)| IndicatorColumn::new(CrossedColumn::new(keys, buckets)).into())
    .collect()
}

/// Model function: predictions, log-loss plus AUC, or a grouped train op
/// depending on the mode.
#[derive(Debug, Clone)]
pub struct WdlModelFn {
    wdl: Wdl,
}

impl WdlModelFn {
    pub fn new(dataset: &MovielensRanking) -> EstimatorResult<Self> {
        let (indicators, embeddings) = build_columns(dataset);
        let mut wide = indicators;
        wide.extend(cross_product_transformation());
        Ok(Self {
            wdl: Wdl::new(wide, embeddings, HIDDEN_UNITS.to_vec())?,
        })
    }

    pub fn model(&self) -> &Wdl {
        &self.wdl
    }
}

impl ModelFn for WdlModelFn {
    fn call(
        &self,
        features: &[Features],
        labels: Option<&[f32]>,
        mode: EstimatorMode,
        session: &mut Session,
    ) -> EstimatorResult<EstimatorSpec> {
        self.wdl.build(session.vars_mut())?;
        let forward = self.wdl.forward(session, features)?;
        let probabilities = forward.probabilities().to_vec();

        if mode == EstimatorMode::Predict {
            return Ok(EstimatorSpec::for_predict(BTreeMap::from([(
                "predictions".to_string(),
                probabilities,
            )])));
        }

        let labels = labels.ok_or(EstimatorError::MissingLabels(mode))?;
        let loss = log_loss(&probabilities, labels);

        if mode == EstimatorMode::Eval {
            let metrics = BTreeMap::from([(
                "auc".to_string(),
                MetricOp::auc(&probabilities, labels),
            )]);
            return Ok(EstimatorSpec::for_eval(loss, metrics));
        }

        let dlogits = log_loss_gradient(&probabilities, labels);
        let grads = self.wdl.backward(session, forward, &dlogits)?;
        let vars = session.vars();
        let train_op = TrainOp::group(
            vec![UpdateOp::IncrementGlobalStep],
            vec![
                OptimizerStep::minimize(
                    OptimizerConfig::ftrl(FTRL_LEARNING_RATE, FTRL_L1),
                    &grads,
                    vars.collection(WIDE),
                )?,
                OptimizerStep::minimize(
                    OptimizerConfig::adam(ADAM_LEARNING_RATE),
                    &grads,
                    vars.collection(DEEP),
                )?,
            ],
        );
        Ok(EstimatorSpec::for_train(loss, train_op))
    }
}

/// CPU-only run configuration; `None` trains into a fresh temporary
/// directory.
pub fn run_config(
    model_dir: Option<PathBuf>,
    inter_op_threads: usize,
    intra_op_threads: usize,
) -> RunConfig {
    let config = RunConfig::new()
        .with_session_config(SessionConfig::new(inter_op_threads, intra_op_threads))
        .with_tf_random_seed(42)
        .with_keep_checkpoint_max(10)
        .with_save_checkpoints_steps(1000)
        .with_log_step_count_steps(100);
    match model_dir {
        Some(dir) => config.with_model_dir(dir),
        None => config,
    }
}

pub fn build_estimator(dataset: &MovielensRanking, config: RunConfig) -> EstimatorResult<Estimator> {
    Estimator::new(WdlModelFn::new(dataset)?, config)
}

/// Training loop parameters for [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub batch_size: usize,
    /// `None` trains until early stopping fires.
    pub max_steps: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 256,
            max_steps: None,
        }
    }
}

/// Trains and evaluates until early stopping (or `max_steps`), returning the
/// final evaluation.
pub fn run(
    dataset: &MovielensRanking,
    estimator: &Estimator,
    options: RunOptions,
) -> EstimatorResult<EvalResult> {
    if options.batch_size == 0 {
        return Err(EstimatorError::InvalidArgument(
            "batch_size must be positive".into(),
        ));
    }
    let train_input: Arc<dyn InputFn> = Arc::new(dataset.training_input_fn(options.batch_size));
    let eval_input: Arc<dyn InputFn> = Arc::new(dataset.testing_input_fn(options.batch_size));

    let early_stopping =
        stop_if_no_decrease_hook(estimator.eval_history(), "loss", MAX_STEPS_WITHOUT_DECREASE);
    let mut train_spec = TrainSpec::new(train_input).with_hook(early_stopping);
    if let Some(max_steps) = options.max_steps {
        train_spec = train_spec.with_max_steps(max_steps);
    }
    let eval_spec = EvalSpec::new(eval_input)
        .with_steps(None)
        .with_start_delay_secs(0)
        .with_throttle_secs(0);

    info!(
        model_dir = %estimator.model_dir().display(),
        train_examples = dataset.train().len(),
        test_examples = dataset.test().len(),
        batch_size = options.batch_size,
        "Starting wide-and-deep training"
    );
    train_and_evaluate(estimator, train_spec, eval_spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deeprec_core::SparseColumn;
    use deeprec_training::{ThreadPools, VariableStore};

    fn dataset() -> MovielensRanking {
        MovielensRanking::synthetic(30, 40, 600, 1).unwrap()
    }

    fn session() -> Session {
        Session::new(
            VariableStore::new(42),
            ThreadPools::new(&SessionConfig::new(2, 2)).unwrap(),
        )
    }

    fn batch(dataset: &MovielensRanking) -> (Vec<Features>, Vec<f32>) {
        dataset
            .train()
            .iter()
            .take(32)
            .map(|e| (e.features.clone(), e.label))
            .unzip()
    }

    #[test]
    fn test_build_columns() {
        let dataset = dataset();
        let (indicators, embeddings) = build_columns(&dataset);
        assert_eq!(indicators.len(), 6);
        assert_eq!(embeddings.len(), 6);

        let fields = [
            "user_id",
            "user_gender",
            "user_age",
            "user_occupation",
            "movie_id",
            "movie_genres",
        ];
        for ((indicator, embedding), field) in indicators.iter().zip(&embeddings).zip(fields) {
            assert_eq!(indicator.name(), format!("{field}_indicator"));
            match embedding {
                FeatureColumn::Embedding(e) => {
                    assert_eq!(e.dimension(), 16);
                    assert_eq!(e.categorical().key(), field);
                }
                other => panic!("expected an embedding column, got {other:?}"),
            }
        }
        assert_eq!(indicators[0].output_dim(), dataset.num_users());
        assert_eq!(indicators[4].output_dim(), dataset.num_movies());
    }

    #[test]
    fn test_cross_product_transformation() {
        let crosses = cross_product_transformation();
        let buckets: Vec<usize> = crosses
            .iter()
            .map(|c| match c {
                FeatureColumn::Indicator(i) => {
                    assert!(matches!(i.categorical(), SparseColumn::Crossed(_)));
                    i.num_buckets()
                }
                other => panic!("expected an indicator column, got {other:?}"),
            })
            .collect();
        assert_eq!(buckets, vec![14, 40, 140]);
    }

    #[test]
    fn test_predict_mode_returns_only_predictions() {
        let dataset = dataset();
        let model_fn = WdlModelFn::new(&dataset).unwrap();
        let (features, _) = batch(&dataset);

        let spec = model_fn
            .call(&features, None, EstimatorMode::Predict, &mut session())
            .unwrap();
        assert_eq!(spec.predictions.keys().collect::<Vec<_>>(), vec!["predictions"]);
        assert_eq!(spec.predictions["predictions"].len(), features.len());
        assert!(spec.loss.is_none());
        assert!(spec.eval_metric_ops.is_empty());
        assert!(spec.train_op.is_none());
    }

    #[test]
    fn test_eval_mode_returns_loss_and_auc() {
        let dataset = dataset();
        let model_fn = WdlModelFn::new(&dataset).unwrap();
        let (features, labels) = batch(&dataset);

        let spec = model_fn
            .call(&features, Some(labels.as_slice()), EstimatorMode::Eval, &mut session())
            .unwrap();
        let loss = spec.loss.unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        assert!(spec.eval_metric_ops.contains_key("auc"));
        assert!(spec.train_op.is_none());

        assert!(matches!(
            model_fn.call(&features, None, EstimatorMode::Eval, &mut session()),
            Err(EstimatorError::MissingLabels(EstimatorMode::Eval))
        ));
    }

    #[test]
    fn test_train_mode_groups_wide_and_deep_steps() {
        let dataset = dataset();
        let model_fn = WdlModelFn::new(&dataset).unwrap();
        let (features, labels) = batch(&dataset);
        let mut session = session();

        let spec = model_fn
            .call(&features, Some(labels.as_slice()), EstimatorMode::Train, &mut session)
            .unwrap();
        assert!(spec.loss.is_some());
        let train_op = spec.train_op.unwrap();
        assert_eq!(train_op.update_ops(), &[UpdateOp::IncrementGlobalStep]);
        assert!(train_op.has_step_for(WIDE, session.vars()));
        assert!(train_op.has_step_for(DEEP, session.vars()));

        let names: Vec<&str> = train_op.steps().iter().map(|s| s.config().name()).collect();
        assert_eq!(names, vec!["Ftrl", "Adam"]);
        for step in train_op.steps() {
            let group = if step.config().name() == "Ftrl" { "wide/" } else { "deep/" };
            assert!(step.var_list().iter().all(|v| v.starts_with(group)));
        }
    }

    #[test]
    fn test_run_config() {
        let config = run_config(None, 8, 8);
        assert_eq!(config.session_config.gpu_count(), 0);
        assert_eq!(config.session_config.inter_op_parallelism_threads, 8);
        assert_eq!(config.session_config.intra_op_parallelism_threads, 8);
        assert_eq!(config.keep_checkpoint_max, 10);
        assert_eq!(config.save_checkpoints_steps, 1000);
        assert_eq!(config.log_step_count_steps, 100);
        assert_eq!(config.tf_random_seed, Some(42));
        assert!(config.model_dir.is_none());

        let config = run_config(Some(PathBuf::from("/tmp/wdl")), 2, 4);
        assert_eq!(config.model_dir, Some(PathBuf::from("/tmp/wdl")));
    }

    #[test]
    fn test_run_rejects_zero_batch() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset();
        let estimator =
            build_estimator(&dataset, run_config(Some(dir.path().to_path_buf()), 1, 1)).unwrap();
        let options = RunOptions {
            batch_size: 0,
            max_steps: Some(1),
        };
        assert!(matches!(
            run(&dataset, &estimator, options),
            Err(EstimatorError::InvalidArgument(_))
        ));
    }
}
