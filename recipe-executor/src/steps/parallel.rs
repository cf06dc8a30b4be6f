//! `parallel`: fan out independent substeps concurrently, fail-fast
//!
//! Each substep runs against an isolated clone of the parent context; no
//! clone artifacts are merged back. Parallel substeps are for independent
//! side-effecting work; recipes that need outputs use `loop` instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::recipe::StepDefinition;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "parallel";

#[derive(Debug, Deserialize)]
struct ParallelConfig {
    substeps: Vec<StepDefinition>,
    #[serde(default)]
    max_concurrency: usize,
    #[serde(default)]
    delay: f64,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: ParallelConfig = parse_config(STEP_TYPE, config)?;
    Ok(Box::new(ParallelStep { config }))
}

#[derive(Debug)]
struct ParallelStep {
    config: ParallelConfig,
}

#[async_trait]
impl Step for ParallelStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        if self.config.substeps.is_empty() {
            return Ok(());
        }

        let capacity = if self.config.max_concurrency > 0 {
            self.config.max_concurrency
        } else {
            self.config.substeps.len()
        };
        debug!(
            substeps = self.config.substeps.len(),
            capacity, "starting parallel fan-out"
        );

        let semaphore = Arc::new(Semaphore::new(capacity));
        let mut tasks: JoinSet<(usize, Result<()>)> = JoinSet::new();

        for (index, definition) in self.config.substeps.iter().enumerate() {
            // Fail fast: a finished failure stops further launches.
            while let Some(joined) = tasks.try_join_next() {
                if let Some(failure) = check_joined(joined) {
                    tasks.abort_all();
                    return Err(failure);
                }
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if index > 0 && self.config.delay > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(self.config.delay)).await;
            }

            let executor = executor.clone();
            let definition = definition.clone();
            let mut branch_context = context.isolate();
            tasks.spawn(async move {
                let _permit = permit;
                let result = executor.run_step(&definition, &mut branch_context).await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some(failure) = check_joined(joined) {
                tasks.abort_all();
                return Err(failure);
            }
        }

        Ok(())
    }
}

type Joined = std::result::Result<(usize, Result<()>), tokio::task::JoinError>;

/// Map a joined task to `Some(ParallelFailure)` if the substep failed.
fn check_joined(joined: Joined) -> Option<RecipeError> {
    match joined {
        Ok((_, Ok(()))) => None,
        Ok((index, Err(source))) => {
            warn!(index, error = %source, "parallel substep failed");
            Some(RecipeError::ParallelFailure {
                index,
                source: Box::new(source),
            })
        }
        Err(join_error) => {
            if !join_error.is_cancelled() {
                warn!(error = %join_error, "parallel substep task aborted");
            }
            None
        }
    }
}
