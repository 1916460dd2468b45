//! Trains the wide-and-deep model through the estimator on a toy task.

use std::collections::BTreeMap;
use std::sync::Arc;

use deeprec_core::graph_keys::{DEEP, WIDE};
use deeprec_core::{
    CategoricalColumn, CrossedColumn, EmbeddingColumn, FeatureColumn, Features, IndicatorColumn,
};
use deeprec_data::{DatasetInput, LabeledExample};
use deeprec_models::Wdl;
use deeprec_optimizer::OptimizerConfig;
use deeprec_training::{
    log_loss, log_loss_gradient, Estimator, EstimatorError, EstimatorMode, EstimatorResult,
    EstimatorSpec, MetricOp, ModelFn, OptimizerStep, RunConfig, Session, SessionConfig, TrainOp,
    UpdateOp,
};
use tempfile::tempdir;

struct ToyWdl {
    wdl: Wdl,
}

impl ToyWdl {
    fn new() -> Self {
        let gender = CategoricalColumn::vocabulary_list("user_gender", ["F", "M"]);
        let item = CategoricalColumn::hash_bucket("item", 16);
        let wide: Vec<FeatureColumn> = vec![
            IndicatorColumn::new(gender.clone()).into(),
            IndicatorColumn::new(CrossedColumn::new([gender.clone(), item.clone()], 32)).into(),
        ];
        let deep: Vec<FeatureColumn> = vec![
            EmbeddingColumn::new(gender, 4).into(),
            EmbeddingColumn::new(item, 4).into(),
        ];
        Self {
            wdl: Wdl::new(wide, deep, vec![8, 4]).unwrap(),
        }
    }
}

impl ModelFn for ToyWdl {
    fn call(
        &self,
        features: &[Features],
        labels: Option<&[f32]>,
        mode: EstimatorMode,
        session: &mut Session,
    ) -> EstimatorResult<EstimatorSpec> {
        self.wdl.build(session.vars_mut())?;
        let forward = self.wdl.forward(session, features)?;
        let probs = forward.probabilities().to_vec();
        if mode == EstimatorMode::Predict {
            return Ok(EstimatorSpec::for_predict(BTreeMap::from([(
                "predictions".to_string(),
                probs,
            )])));
        }

        let labels = labels.ok_or(EstimatorError::MissingLabels(mode))?;
        let loss = log_loss(&probs, labels);
        if mode == EstimatorMode::Eval {
            let ops = BTreeMap::from([("auc".to_string(), MetricOp::auc(&probs, labels))]);
            return Ok(EstimatorSpec::for_eval(loss, ops));
        }

        let grads = self
            .wdl
            .backward(session, forward, &log_loss_gradient(&probs, labels))?;
        let vars = session.vars();
        let train_op = TrainOp::group(
            vec![UpdateOp::IncrementGlobalStep],
            vec![
                OptimizerStep::minimize(OptimizerConfig::ftrl(0.1, 0.0), &grads, vars.collection(WIDE))?,
                OptimizerStep::minimize(OptimizerConfig::adam(0.01), &grads, vars.collection(DEEP))?,
            ],
        );
        Ok(EstimatorSpec::for_train(loss, train_op))
    }
}

/// Women like even items, men like odd ones.
fn examples() -> Arc<Vec<LabeledExample>> {
    let mut out = Vec::new();
    for gender in ["F", "M"] {
        for item in 0..8i64 {
            let liked = (gender == "F") == (item % 2 == 0);
            let features = Features::new().with("user_gender", gender).with("item", item);
            out.push(LabeledExample::new(features, if liked { 1.0 } else { 0.0 }));
        }
    }
    Arc::new(out)
}

fn estimator(dir: &std::path::Path) -> Estimator {
    let config = RunConfig::new()
        .with_model_dir(dir)
        .with_tf_random_seed(42)
        .with_save_checkpoints_steps(100)
        .with_session_config(SessionConfig::new(2, 2));
    Estimator::new(ToyWdl::new(), config).unwrap()
}

#[test]
fn training_learns_the_crossed_pattern() {
    let dir = tempdir().unwrap();
    let estimator = estimator(dir.path());
    let eval = DatasetInput::once(examples(), 16);

    estimator
        .train(&DatasetInput::repeated(examples(), 8, 3), Vec::new(), Some(1), None)
        .unwrap();
    let before = estimator.evaluate(&eval, None, None).unwrap().metrics.loss;

    estimator
        .train(&DatasetInput::repeated(examples(), 8, 3), Vec::new(), Some(300), None)
        .unwrap();
    let after = estimator.evaluate(&eval, None, None).unwrap().metrics;

    assert!(after.loss < before, "loss {} -> {}", before, after.loss);
    assert!(after.get("auc").unwrap() > 0.8);
}

#[test]
fn predictions_are_probabilities() {
    let dir = tempdir().unwrap();
    let estimator = estimator(dir.path());
    estimator
        .train(&DatasetInput::repeated(examples(), 8, 3), Vec::new(), Some(10), None)
        .unwrap();

    let result = estimator.predict(&DatasetInput::once(examples(), 5)).unwrap();
    let probs = result.get("predictions").unwrap();
    assert_eq!(probs.len(), 16);
    assert!(probs.iter().all(|&p| p > 0.0 && p < 1.0));
}
