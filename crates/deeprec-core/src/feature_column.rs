//! Declarative feature columns.
//!
//! Columns describe how raw [`Features`] fields become model inputs:
//!
//! - [`CategoricalColumn`] maps a field to integer ids, either by hashing into
//!   a bucket space or by lookup against a fixed vocabulary.
//! - [`CrossedColumn`] hashes the combination of several fields.
//! - [`IndicatorColumn`] one-hot (multi-hot) encodes a categorical or crossed
//!   column.
//! - [`EmbeddingColumn`] looks ids up in a dense table of fixed dimension.
//!
//! Columns carry no state. Encoding produces [`SparseIds`] that the model
//! layers consume.
//!
//! # Example
//!
//! ```
//! use deeprec_core::feature::Features;
//! use deeprec_core::feature_column::{CategoricalColumn, IndicatorColumn};
//!
//! let gender = CategoricalColumn::vocabulary_list("user_gender", ["F", "M"]);
//! let column = IndicatorColumn::new(gender);
//! let features = Features::new().with("user_gender", "M");
//! assert_eq!(column.encode(&features).unwrap(), vec![(1, 1.0)]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::feature::Features;

/// Ids produced for one example, in lookup order. Repeated ids are allowed.
pub type SparseIds = Vec<usize>;

const CROSS_SEPARATOR: char = '\u{1}';

/// Stable 32-bit fingerprint of a token.
///
/// Bucket assignment must not change between processes or releases, so this
/// uses CRC32C rather than the randomized std hasher.
pub fn fingerprint(token: &str) -> u32 {
    crc32c::crc32c(token.as_bytes())
}

/// A column producing categorical ids from a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoricalColumn {
    /// `fingerprint(value) % hash_bucket_size`.
    HashBucket {
        /// Field name.
        key: String,
        /// Number of buckets.
        hash_bucket_size: usize,
    },
    /// Position of the value in `vocabulary`; unknown values produce no id.
    VocabularyList {
        /// Field name.
        key: String,
        /// Known values.
        vocabulary: Vec<String>,
    },
}

impl CategoricalColumn {
    /// Hashes the field into `hash_bucket_size` buckets.
    pub fn hash_bucket(key: impl Into<String>, hash_bucket_size: usize) -> Self {
        CategoricalColumn::HashBucket {
            key: key.into(),
            hash_bucket_size,
        }
    }

    /// Looks the field up in a fixed vocabulary.
    pub fn vocabulary_list<I, S>(key: impl Into<String>, vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        CategoricalColumn::VocabularyList {
            key: key.into(),
            vocabulary: vocabulary.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    /// The raw field this column reads.
    pub fn key(&self) -> &str {
        match self {
            CategoricalColumn::HashBucket { key, .. } => key,
            CategoricalColumn::VocabularyList { key, .. } => key,
        }
    }

    /// Column name; same as the key.
    pub fn name(&self) -> &str {
        self.key()
    }

    /// Size of the id space.
    pub fn num_buckets(&self) -> usize {
        match self {
            CategoricalColumn::HashBucket {
                hash_bucket_size, ..
            } => *hash_bucket_size,
            CategoricalColumn::VocabularyList { vocabulary, .. } => vocabulary.len(),
        }
    }

    /// Checks that the id space is non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.num_buckets() == 0 {
            return Err(CoreError::InvalidColumn {
                column: self.name().to_string(),
                message: "id space must be non-empty".to_string(),
            });
        }
        Ok(())
    }

    /// Maps one token to its id.
    pub fn token_id(&self, token: &str) -> Option<usize> {
        match self {
            CategoricalColumn::HashBucket {
                hash_bucket_size, ..
            } => {
                if *hash_bucket_size == 0 {
                    return None;
                }
                Some(fingerprint(token) as usize % hash_bucket_size)
            }
            CategoricalColumn::VocabularyList { vocabulary, .. } => {
                vocabulary.iter().position(|v| v == token)
            }
        }
    }

    /// Encodes the field of one example.
    pub fn ids(&self, features: &Features) -> Result<SparseIds> {
        let value = features.require(self.key())?;
        Ok(value
            .tokens()
            .iter()
            .filter_map(|token| self.token_id(token))
            .collect())
    }
}

/// One input of a [`CrossedColumn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossKey {
    /// Raw tokens of a field.
    Raw(String),
    /// Ids produced by a categorical column.
    Column(CategoricalColumn),
}

impl CrossKey {
    fn name(&self) -> &str {
        match self {
            CrossKey::Raw(key) => key,
            CrossKey::Column(column) => column.name(),
        }
    }

    fn parts(&self, features: &Features) -> Result<Vec<String>> {
        match self {
            CrossKey::Raw(key) => Ok(features.require(key)?.tokens()),
            CrossKey::Column(column) => Ok(column
                .ids(features)?
                .into_iter()
                .map(|id| id.to_string())
                .collect()),
        }
    }
}

impl From<&str> for CrossKey {
    fn from(key: &str) -> Self {
        CrossKey::Raw(key.to_string())
    }
}

impl From<CategoricalColumn> for CrossKey {
    fn from(column: CategoricalColumn) -> Self {
        CrossKey::Column(column)
    }
}

/// Hashes the Cartesian product of several inputs into a bucket space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossedColumn {
    keys: Vec<CrossKey>,
    hash_bucket_size: usize,
}

impl CrossedColumn {
    /// Creates a crossed column.
    pub fn new<I, K>(keys: I, hash_bucket_size: usize) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<CrossKey>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            hash_bucket_size,
        }
    }

    /// Name in the form `a_X_b`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(CrossKey::name)
            .collect::<Vec<_>>()
            .join("_X_")
    }

    /// The crossed inputs.
    pub fn keys(&self) -> &[CrossKey] {
        &self.keys
    }

    /// Number of buckets.
    pub fn hash_bucket_size(&self) -> usize {
        self.hash_bucket_size
    }

    /// A cross needs at least two inputs and a non-empty bucket space.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| CoreError::InvalidColumn {
            column: self.name(),
            message: message.to_string(),
        };
        if self.keys.len() < 2 {
            return Err(fail("a cross needs at least two keys"));
        }
        if self.hash_bucket_size == 0 {
            return Err(fail("hash_bucket_size must be positive"));
        }
        for key in &self.keys {
            if let CrossKey::Column(column) = key {
                column.validate()?;
            }
        }
        Ok(())
    }

    /// Encodes one example. An input with no parts yields no ids.
    pub fn ids(&self, features: &Features) -> Result<SparseIds> {
        if self.hash_bucket_size == 0 {
            return Ok(Vec::new());
        }

        let mut combos: Vec<String> = vec![String::new()];
        for key in &self.keys {
            let parts = key.parts(features)?;
            let mut next = Vec::with_capacity(combos.len() * parts.len());
            for prefix in &combos {
                for part in &parts {
                    let mut combo = prefix.clone();
                    if !combo.is_empty() {
                        combo.push(CROSS_SEPARATOR);
                    }
                    combo.push_str(key.name());
                    combo.push('=');
                    combo.push_str(part);
                    next.push(combo);
                }
            }
            combos = next;
        }

        Ok(combos
            .iter()
            .map(|combo| fingerprint(combo) as usize % self.hash_bucket_size)
            .collect())
    }
}

/// Input of an [`IndicatorColumn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SparseColumn {
    /// Single field.
    Categorical(CategoricalColumn),
    /// Hashed cross of several fields.
    Crossed(CrossedColumn),
}

impl SparseColumn {
    /// Column name.
    pub fn name(&self) -> String {
        match self {
            SparseColumn::Categorical(c) => c.name().to_string(),
            SparseColumn::Crossed(c) => c.name(),
        }
    }

    /// Size of the id space.
    pub fn num_buckets(&self) -> usize {
        match self {
            SparseColumn::Categorical(c) => c.num_buckets(),
            SparseColumn::Crossed(c) => c.hash_bucket_size(),
        }
    }

    /// Validates the wrapped column.
    pub fn validate(&self) -> Result<()> {
        match self {
            SparseColumn::Categorical(c) => c.validate(),
            SparseColumn::Crossed(c) => c.validate(),
        }
    }

    /// Encodes one example.
    pub fn ids(&self, features: &Features) -> Result<SparseIds> {
        match self {
            SparseColumn::Categorical(c) => c.ids(features),
            SparseColumn::Crossed(c) => c.ids(features),
        }
    }
}

impl From<CategoricalColumn> for SparseColumn {
    fn from(column: CategoricalColumn) -> Self {
        SparseColumn::Categorical(column)
    }
}

impl From<CrossedColumn> for SparseColumn {
    fn from(column: CrossedColumn) -> Self {
        SparseColumn::Crossed(column)
    }
}

/// Multi-hot encoding of a sparse column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorColumn {
    categorical: SparseColumn,
}

impl IndicatorColumn {
    /// Wraps a categorical or crossed column.
    pub fn new(categorical: impl Into<SparseColumn>) -> Self {
        Self {
            categorical: categorical.into(),
        }
    }

    /// Name in the form `<column>_indicator`.
    pub fn name(&self) -> String {
        format!("{}_indicator", self.categorical.name())
    }

    /// Width of the encoded vector.
    pub fn num_buckets(&self) -> usize {
        self.categorical.num_buckets()
    }

    /// The wrapped column.
    pub fn categorical(&self) -> &SparseColumn {
        &self.categorical
    }

    /// Non-zero entries of the multi-hot vector as `(index, count)` pairs,
    /// sorted by index.
    pub fn encode(&self, features: &Features) -> Result<Vec<(usize, f32)>> {
        let mut ids = self.categorical.ids(features)?;
        ids.sort_unstable();

        let mut entries: Vec<(usize, f32)> = Vec::with_capacity(ids.len());
        for id in ids {
            match entries.last_mut() {
                Some((last, count)) if *last == id => *count += 1.0,
                _ => entries.push((id, 1.0)),
            }
        }
        Ok(entries)
    }
}

/// How multiple embeddings of one example are reduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combiner {
    /// Average of the rows.
    #[default]
    Mean,
    /// Sum of the rows.
    Sum,
    /// Sum scaled by `1 / sqrt(n)`.
    Sqrtn,
}

impl Combiner {
    /// Weight applied to each of `n` rows.
    pub fn weight(&self, n: usize) -> f32 {
        if n == 0 {
            return 0.0;
        }
        match self {
            Combiner::Mean => 1.0 / n as f32,
            Combiner::Sum => 1.0,
            Combiner::Sqrtn => 1.0 / (n as f32).sqrt(),
        }
    }
}

/// Dense embedding lookup of a categorical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingColumn {
    categorical: CategoricalColumn,
    dimension: usize,
    combiner: Combiner,
}

impl EmbeddingColumn {
    /// Creates an embedding column with the mean combiner.
    pub fn new(categorical: CategoricalColumn, dimension: usize) -> Self {
        Self {
            categorical,
            dimension,
            combiner: Combiner::Mean,
        }
    }

    /// Overrides the combiner.
    pub fn with_combiner(mut self, combiner: Combiner) -> Self {
        self.combiner = combiner;
        self
    }

    /// Name in the form `<column>_embedding`.
    pub fn name(&self) -> String {
        format!("{}_embedding", self.categorical.name())
    }

    /// Embedding width.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Reduction applied to multi-valued fields.
    pub fn combiner(&self) -> Combiner {
        self.combiner
    }

    /// Number of rows in the embedding table.
    pub fn num_buckets(&self) -> usize {
        self.categorical.num_buckets()
    }

    /// The wrapped column.
    pub fn categorical(&self) -> &CategoricalColumn {
        &self.categorical
    }

    /// Checks the id space and the dimension.
    pub fn validate(&self) -> Result<()> {
        self.categorical.validate()?;
        if self.dimension == 0 {
            return Err(CoreError::InvalidColumn {
                column: self.name(),
                message: "dimension must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Table rows to look up for one example.
    pub fn ids(&self, features: &Features) -> Result<SparseIds> {
        self.categorical.ids(features)
    }
}

/// Any column a model can consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureColumn {
    /// Multi-hot input.
    Indicator(IndicatorColumn),
    /// Dense embedding input.
    Embedding(EmbeddingColumn),
}

impl FeatureColumn {
    /// Column name.
    pub fn name(&self) -> String {
        match self {
            FeatureColumn::Indicator(c) => c.name(),
            FeatureColumn::Embedding(c) => c.name(),
        }
    }

    /// Width of this column in a dense input layer.
    pub fn output_dim(&self) -> usize {
        match self {
            FeatureColumn::Indicator(c) => c.num_buckets(),
            FeatureColumn::Embedding(c) => c.dimension(),
        }
    }

    /// Validates the column.
    pub fn validate(&self) -> Result<()> {
        match self {
            FeatureColumn::Indicator(c) => c.categorical().validate(),
            FeatureColumn::Embedding(c) => c.validate(),
        }
    }
}

impl From<IndicatorColumn> for FeatureColumn {
    fn from(column: IndicatorColumn) -> Self {
        FeatureColumn::Indicator(column)
    }
}

impl From<EmbeddingColumn> for FeatureColumn {
    fn from(column: EmbeddingColumn) -> Self {
        FeatureColumn::Embedding(column)
    }
}
