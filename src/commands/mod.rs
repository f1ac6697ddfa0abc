pub mod display;
pub mod plan;
pub mod update;

use crate::cloud::{Cloud, MemoryCloud};
use crate::cluster::ClusterConfig;
use crate::paths;
use anyhow::{Context, Result};
use reconcile::{CancelToken, ConvergeError, Engine, ExecuteOptions, RetryConfig, RunReport, Target};
use std::path::{Path, PathBuf};

/// A cluster file together with the cloud it is converged against.
pub struct Session {
    pub config: ClusterConfig,
    pub memory: MemoryCloud,
    pub state_path: PathBuf,
    pub retry: RetryConfig,
    pub cancel: CancelToken,
}

impl Session {
    pub fn open(cluster: &Path, state: Option<&Path>) -> Result<Self> {
        let config = ClusterConfig::load(cluster)?;
        let state_path = paths::state_file(state)?;
        let memory = MemoryCloud::load(&state_path)?;
        Ok(Self {
            config,
            memory,
            state_path,
            retry: RetryConfig::default(),
            cancel: CancelToken::new(),
        })
    }

    pub fn cloud(&self) -> Cloud {
        Cloud::new(Box::new(self.memory.clone()), &self.config.cluster.name)
            .with_retry(self.retry.clone())
            .with_cancel(self.cancel.clone())
    }

    /// An engine sharing this session's cancellation with its cloud.
    pub fn engine(&self, target: Target, options: ExecuteOptions) -> Engine {
        Engine::new(target, options).with_cancel(self.cancel.clone())
    }

    pub fn save(&self) -> Result<()> {
        self.memory
            .save(&self.state_path)
            .context("Failed to persist cloud state")
    }
}

/// Report a run that did not converge and turn it into an error.
pub fn not_converged(err: ConvergeError) -> anyhow::Error {
    match &err {
        ConvergeError::Invalid(_) => {}
        ConvergeError::Failed(report) | ConvergeError::Cancelled(report) => {
            display::print_failures(report);
            display::print_summary(&report.summary());
        }
    }
    anyhow::Error::new(err)
}

/// Converge result as a report, reporting failures on the way.
pub fn converged(result: Result<RunReport, ConvergeError>) -> Result<RunReport> {
    result.map_err(not_converged)
}
