//! Execution context handed to model functions.

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::run_config::SessionConfig;
use crate::variables::VariableStore;

/// Thread pools built from a [`SessionConfig`], shared by every session of
/// an estimator.
#[derive(Clone)]
pub struct ThreadPools {
    inter_op: Arc<ThreadPool>,
    intra_op: Arc<ThreadPool>,
}

impl std::fmt::Debug for ThreadPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPools")
            .field("inter_op", &self.inter_op.current_num_threads())
            .field("intra_op", &self.intra_op.current_num_threads())
            .finish()
    }
}

impl ThreadPools {
    pub fn new(config: &SessionConfig) -> Result<Self, rayon::ThreadPoolBuildError> {
        if config.gpu_count() > 0 {
            tracing::warn!(
                gpus = config.gpu_count(),
                "GPU devices requested but only CPU execution is supported"
            );
        }
        let inter_op = ThreadPoolBuilder::new()
            .num_threads(config.inter_op_parallelism_threads)
            .thread_name(|i| format!("deeprec-inter-op-{i}"))
            .build()?;
        let intra_op = ThreadPoolBuilder::new()
            .num_threads(config.intra_op_parallelism_threads)
            .thread_name(|i| format!("deeprec-intra-op-{i}"))
            .build()?;
        tracing::debug!(
            inter_op = inter_op.current_num_threads(),
            intra_op = intra_op.current_num_threads(),
            "Built session thread pools"
        );
        Ok(Self {
            inter_op: Arc::new(inter_op),
            intra_op: Arc::new(intra_op),
        })
    }
}

/// Variables plus the pools to run a model on.
#[derive(Debug)]
pub struct Session {
    vars: VariableStore,
    pools: ThreadPools,
}

impl Session {
    pub fn new(vars: VariableStore, pools: ThreadPools) -> Self {
        Self { vars, pools }
    }

    pub fn vars(&self) -> &VariableStore {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut VariableStore {
        &mut self.vars
    }

    pub fn into_vars(self) -> VariableStore {
        self.vars
    }

    /// Runs two independent computations on the inter-op pool.
    pub fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        self.pools.inter_op.install(|| rayon::join(a, b))
    }

    /// Runs `f` on the intra-op pool; rayon parallel iterators inside it use
    /// that pool.
    pub fn intra_op<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pools.intra_op.install(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_pools_run_work() {
        let pools = ThreadPools::new(&SessionConfig::new(2, 3)).unwrap();
        let session = Session::new(VariableStore::new(0), pools);

        let (a, b) = session.join(|| 1 + 1, || "deep");
        assert_eq!((a, b), (2, "deep"));

        let threads = session.intra_op(rayon::current_num_threads);
        assert_eq!(threads, 3);

        let sum: i32 = session.intra_op(|| (1..=10).into_par_iter().sum());
        assert_eq!(sum, 55);
    }
}
