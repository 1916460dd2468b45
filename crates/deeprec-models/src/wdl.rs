//! Wide-and-deep (WDL) model.
//!
//! The wide part is a linear model over multi-hot indicator columns, the
//! deep part an MLP over pooled embeddings. The two logits are summed before
//! the sigmoid:
//!
//! ```text
//! p = sigmoid(wide(x) + deep(x))
//! wide(x) = sum_c  w_c . onehot_c(x) + b_wide
//! deep(x) = dense_out(relu(... relu(dense_1([emb_1(x), ..., emb_k(x)]))))
//! ```
//!
//! Variables live in the session's [`VariableStore`]: everything under
//! `wide/` is tagged [`WIDE`], everything under `deep/` is tagged [`DEEP`],
//! so a train op can hand each group to its own optimizer.

use deeprec_core::graph_keys::{trainable, DEEP, WIDE};
use deeprec_core::{FeatureColumn, Features, IndicatorColumn};
use deeprec_layers::{
    sigmoid, ActivationType, Dense, EmbeddingBag, Initializer, Layer, MLPConfig, SparseLinear,
    SparseRow, Tensor, MLP,
};
use deeprec_training::{EstimatorError, EstimatorResult, Gradients, Session, VariableStore};
use rayon::prelude::*;
use tracing::debug;

const WIDE_BIAS: &str = "wide/bias";
const LOGITS_KERNEL: &str = "deep/logits/kernel";
const LOGITS_BIAS: &str = "deep/logits/bias";

fn wide_weights_name(column: &IndicatorColumn) -> String {
    format!("wide/linear/{}/weights", column.name())
}

fn embedding_table_name(column: &FeatureColumn) -> String {
    format!("deep/embedding/{}/table", column.name())
}

fn hidden_kernel_name(layer: usize) -> String {
    format!("deep/dnn/dense_{layer}/kernel")
}

fn hidden_bias_name(layer: usize) -> String {
    format!("deep/dnn/dense_{layer}/bias")
}

/// Wide-and-deep model description. Holds no parameters itself.
#[derive(Debug, Clone)]
pub struct Wdl {
    wide_columns: Vec<IndicatorColumn>,
    deep_columns: Vec<FeatureColumn>,
    hidden_units: Vec<usize>,
}

impl Wdl {
    /// Creates a model.
    ///
    /// # Errors
    ///
    /// Fails when a column is invalid, a wide column is not an indicator
    /// column, a hidden layer has zero units, or there are no columns.
    pub fn new(
        wide_columns: Vec<FeatureColumn>,
        deep_columns: Vec<FeatureColumn>,
        hidden_units: Vec<usize>,
    ) -> EstimatorResult<Self> {
        if wide_columns.is_empty() && deep_columns.is_empty() {
            return Err(EstimatorError::Model(
                "wide-and-deep model needs at least one column".into(),
            ));
        }
        if let Some(i) = hidden_units.iter().position(|&u| u == 0) {
            return Err(EstimatorError::Model(format!(
                "hidden layer {i} has zero units"
            )));
        }

        let wide_columns = wide_columns
            .into_iter()
            .map(|column| {
                column.validate()?;
                match column {
                    FeatureColumn::Indicator(indicator) => Ok(indicator),
                    FeatureColumn::Embedding(embedding) => Err(EstimatorError::Model(format!(
                        "wide column {} must be an indicator column",
                        embedding.name()
                    ))),
                }
            })
            .collect::<EstimatorResult<Vec<_>>>()?;
        for column in &deep_columns {
            column.validate()?;
        }

        Ok(Self {
            wide_columns,
            deep_columns,
            hidden_units,
        })
    }

    pub fn wide_columns(&self) -> &[IndicatorColumn] {
        &self.wide_columns
    }

    pub fn deep_columns(&self) -> &[FeatureColumn] {
        &self.deep_columns
    }

    pub fn hidden_units(&self) -> &[usize] {
        &self.hidden_units
    }

    /// Width of the concatenated deep input.
    pub fn deep_input_dim(&self) -> usize {
        self.deep_columns.iter().map(FeatureColumn::output_dim).sum()
    }

    fn has_deep(&self) -> bool {
        !self.deep_columns.is_empty()
    }

    /// Creates every variable of the model that does not exist yet.
    pub fn build(&self, vars: &mut VariableStore) -> EstimatorResult<()> {
        for column in &self.wide_columns {
            vars.get_or_create(
                &wide_weights_name(column),
                &[column.num_buckets(), 1],
                &Initializer::Zeros,
                trainable(WIDE),
            )?;
        }
        vars.get_or_create(WIDE_BIAS, &[1], &Initializer::Zeros, trainable(WIDE))?;

        if !self.has_deep() {
            return Ok(());
        }
        for column in &self.deep_columns {
            if let FeatureColumn::Embedding(embedding) = column {
                vars.get_or_create(
                    &embedding_table_name(column),
                    &[embedding.num_buckets(), embedding.dimension()],
                    &Initializer::for_embedding(embedding.dimension()),
                    trainable(DEEP),
                )?;
            }
        }
        let mut fan_in = self.deep_input_dim();
        for (i, &units) in self.hidden_units.iter().enumerate() {
            vars.get_or_create(
                &hidden_kernel_name(i),
                &[fan_in, units],
                &Initializer::GlorotUniform,
                trainable(DEEP),
            )?;
            vars.get_or_create(&hidden_bias_name(i), &[units], &Initializer::Zeros, trainable(DEEP))?;
            fan_in = units;
        }
        vars.get_or_create(
            LOGITS_KERNEL,
            &[fan_in, 1],
            &Initializer::GlorotUniform,
            trainable(DEEP),
        )?;
        vars.get_or_create(LOGITS_BIAS, &[1], &Initializer::Zeros, trainable(DEEP))?;
        Ok(())
    }

    /// Runs both towers on the inter-op pool and returns the logits and
    /// probabilities together with what [`Wdl::backward`] needs.
    ///
    /// The variables must already exist, see [`Wdl::build`].
    pub fn forward(&self, session: &Session, features: &[Features]) -> EstimatorResult<WdlForward> {
        let (wide, deep) = session.join(
            || self.wide_forward(session, features),
            || self.deep_forward(session, features),
        );
        let (wide_logits, wide) = wide?;
        let (deep_logits, deep) = match deep? {
            Some((logits, pass)) => (Some(logits), Some(pass)),
            None => (None, None),
        };

        let logits: Vec<f32> = match &deep_logits {
            Some(deep_logits) => wide_logits.add(deep_logits).data().to_vec(),
            None => wide_logits.data().to_vec(),
        };
        let probabilities = logits.iter().map(|&l| sigmoid(l)).collect();
        Ok(WdlForward {
            logits,
            probabilities,
            wide,
            deep,
        })
    }

    fn wide_forward(
        &self,
        session: &Session,
        features: &[Features],
    ) -> EstimatorResult<(Tensor, WidePass)> {
        let vars = session.vars();
        let bias = vars.value(WIDE_BIAS)?.data()[0];
        let mut logits = Tensor::full(&[features.len(), 1], bias);
        let mut linears = Vec::with_capacity(self.wide_columns.len());

        for column in &self.wide_columns {
            let name = wide_weights_name(column);
            let rows = encode_rows(session, column, features)?;
            let mut linear = SparseLinear::new();
            logits = logits.add(&linear.forward_train(vars.value(&name)?, &rows)?);
            linears.push(WideColumnPass {
                name,
                num_buckets: column.num_buckets(),
                linear,
            });
        }
        Ok((logits, WidePass { linears }))
    }

    fn deep_forward(
        &self,
        session: &Session,
        features: &[Features],
    ) -> EstimatorResult<Option<(Tensor, DeepPass)>> {
        if !self.has_deep() {
            return Ok(None);
        }
        let vars = session.vars();

        let mut inputs = Vec::with_capacity(self.deep_columns.len());
        let mut lookups = Vec::with_capacity(self.deep_columns.len());
        for column in &self.deep_columns {
            match column {
                FeatureColumn::Embedding(embedding) => {
                    let ids = session
                        .intra_op(|| {
                            features
                                .par_iter()
                                .map(|f| embedding.ids(f))
                                .collect::<Result<Vec<_>, _>>()
                        })?;
                    let table_name = embedding_table_name(column);
                    let mut bag = EmbeddingBag::new(embedding.combiner());
                    inputs.push(bag.forward_train(vars.value(&table_name)?, &ids)?);
                    lookups.push(DeepLookup::Embedding {
                        table_name,
                        num_rows: embedding.num_buckets(),
                        bag,
                    });
                }
                FeatureColumn::Indicator(indicator) => {
                    let rows = encode_rows(session, indicator, features)?;
                    inputs.push(multi_hot(&rows, indicator.num_buckets()));
                    lookups.push(DeepLookup::Indicator);
                }
            }
        }
        let input = Tensor::concat_columns(&inputs)?;

        let mut mlp = self.hidden_mlp(vars)?;
        let hidden = match mlp.as_mut() {
            Some(mlp) => mlp.forward_train(&input)?,
            None => input,
        };
        let mut logits_layer = Dense::from_weights(
            vars.value(LOGITS_KERNEL)?.clone(),
            vars.value(LOGITS_BIAS)?.clone(),
        )?;
        let logits = logits_layer.forward_train(&hidden)?;

        Ok(Some((
            logits,
            DeepPass {
                widths: self.deep_columns.iter().map(FeatureColumn::output_dim).collect(),
                lookups,
                mlp,
                logits_layer,
            },
        )))
    }

    fn hidden_mlp(&self, vars: &VariableStore) -> EstimatorResult<Option<MLP>> {
        if self.hidden_units.is_empty() {
            return Ok(None);
        }
        let config = self
            .hidden_units
            .iter()
            .fold(MLPConfig::new(self.deep_input_dim()), |config, &units| {
                config.add_layer(units, ActivationType::ReLU)
            });
        let dense = (0..self.hidden_units.len())
            .map(|i| {
                Ok(Dense::from_weights(
                    vars.value(&hidden_kernel_name(i))?.clone(),
                    vars.value(&hidden_bias_name(i))?.clone(),
                )?)
            })
            .collect::<EstimatorResult<Vec<_>>>()?;
        Ok(Some(MLP::from_dense_layers(config, dense)?))
    }

    /// Back-propagates `dlogits` (the loss gradient with respect to each
    /// logit) and returns the gradient of every variable by name.
    pub fn backward(
        &self,
        session: &Session,
        forward: WdlForward,
        dlogits: &[f32],
    ) -> EstimatorResult<Gradients> {
        if dlogits.len() != forward.logits.len() {
            return Err(EstimatorError::Model(format!(
                "expected {} logit gradients, got {}",
                forward.logits.len(),
                dlogits.len()
            )));
        }
        let grad = Tensor::from_data(&[dlogits.len(), 1], dlogits.to_vec());

        let WdlForward { wide, deep, .. } = forward;
        let (wide_grads, deep_grads) = session.join(
            || wide.backward(&grad),
            || match deep {
                Some(deep) => deep.backward(&grad),
                None => Ok(Gradients::new()),
            },
        );
        let mut grads = wide_grads?;
        grads.extend(deep_grads?);
        debug!(variables = grads.len(), "Computed wide-and-deep gradients");
        Ok(grads)
    }
}

/// Result of [`Wdl::forward`].
#[derive(Debug)]
pub struct WdlForward {
    logits: Vec<f32>,
    probabilities: Vec<f32>,
    wide: WidePass,
    deep: Option<DeepPass>,
}

impl WdlForward {
    pub fn logits(&self) -> &[f32] {
        &self.logits
    }

    /// One probability in `(0, 1)` per record.
    pub fn probabilities(&self) -> &[f32] {
        &self.probabilities
    }

    pub fn into_probabilities(self) -> Vec<f32> {
        self.probabilities
    }
}

#[derive(Debug)]
struct WideColumnPass {
    name: String,
    num_buckets: usize,
    linear: SparseLinear,
}

#[derive(Debug)]
struct WidePass {
    linears: Vec<WideColumnPass>,
}

impl WidePass {
    fn backward(&self, grad: &Tensor) -> EstimatorResult<Gradients> {
        let mut grads = Gradients::new();
        for column in &self.linears {
            grads.insert(
                column.name.clone(),
                column.linear.backward(grad, column.num_buckets)?,
            );
        }
        grads.insert(WIDE_BIAS.to_string(), grad.sum_axis(0).reshape(&[1])?);
        Ok(grads)
    }
}

#[derive(Debug)]
enum DeepLookup {
    Embedding {
        table_name: String,
        num_rows: usize,
        bag: EmbeddingBag,
    },
    /// Multi-hot input fed straight into the network; nothing to train.
    Indicator,
}

#[derive(Debug)]
struct DeepPass {
    widths: Vec<usize>,
    lookups: Vec<DeepLookup>,
    mlp: Option<MLP>,
    logits_layer: Dense,
}

impl DeepPass {
    fn backward(mut self, grad: &Tensor) -> EstimatorResult<Gradients> {
        let mut grads = Gradients::new();

        let mut g = self.logits_layer.backward(grad)?;
        insert_dense_grads(&mut grads, &self.logits_layer, LOGITS_KERNEL, LOGITS_BIAS)?;

        if let Some(mlp) = self.mlp.as_mut() {
            g = mlp.backward(&g)?;
            for (i, dense) in mlp.dense_layers().iter().enumerate() {
                insert_dense_grads(&mut grads, dense, &hidden_kernel_name(i), &hidden_bias_name(i))?;
            }
        }

        for (part, lookup) in g.split_columns(&self.widths)?.iter().zip(&self.lookups) {
            if let DeepLookup::Embedding {
                table_name,
                num_rows,
                bag,
            } = lookup
            {
                grads.insert(table_name.clone(), bag.backward(part, *num_rows)?);
            }
        }
        Ok(grads)
    }
}

fn insert_dense_grads(
    grads: &mut Gradients,
    dense: &Dense,
    kernel: &str,
    bias: &str,
) -> EstimatorResult<()> {
    let (Some(w), Some(b)) = (dense.weights_grad(), dense.bias_grad()) else {
        return Err(EstimatorError::Model(format!(
            "no gradient recorded for {kernel}"
        )));
    };
    grads.insert(kernel.to_string(), w.clone());
    grads.insert(bias.to_string(), b.reshape(&[dense.out_features()])?);
    Ok(())
}

fn encode_rows(
    session: &Session,
    column: &IndicatorColumn,
    features: &[Features],
) -> EstimatorResult<Vec<SparseRow>> {
    let rows = session.intra_op(|| {
        features
            .par_iter()
            .map(|f| column.encode(f))
            .collect::<Result<Vec<_>, _>>()
    })?;
    Ok(rows)
}

fn multi_hot(rows: &[SparseRow], width: usize) -> Tensor {
    let mut out = Tensor::zeros(&[rows.len(), width]);
    let data = out.data_mut();
    for (b, row) in rows.iter().enumerate() {
        for &(index, value) in row {
            data[b * width + index] = value;
        }
    }
    out
}
