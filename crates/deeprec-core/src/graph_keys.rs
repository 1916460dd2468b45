//! Well-known collection names for tagging variables.
//!
//! Every variable in a model carries a set of collection tags. Optimizers
//! select the variables they update by tag, which is how the wide and deep
//! parts of a model are trained by different optimizers.

/// Variables of the linear (memorization) part of a model.
pub const WIDE: &str = "wide";

/// Variables of the embedding and MLP (generalization) part of a model.
pub const DEEP: &str = "deep";

/// Every variable an optimizer may update.
pub const TRAINABLE_VARIABLES: &str = "trainable_variables";

/// Every variable that is saved in a checkpoint.
pub const GLOBAL_VARIABLES: &str = "variables";

/// Default tags for a trainable variable created under `scope`.
pub fn trainable(scope: &str) -> Vec<String> {
    vec![
        scope.to_string(),
        TRAINABLE_VARIABLES.to_string(),
        GLOBAL_VARIABLES.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainable_tags() {
        let tags = trainable(WIDE);
        assert!(tags.contains(&"wide".to_string()));
        assert!(tags.contains(&TRAINABLE_VARIABLES.to_string()));
        assert!(!tags.contains(&DEEP.to_string()));
    }
}
