//! Experiment tracking sinks

use runtime_core::{Error, ExperimentTracker, Result, TrainingConfig};
#[cfg(feature = "tracking")]
use tracing::info;

#[cfg(feature = "tracking")]
pub use jsonl::{JsonlTracker, RunConfig};

/// Open the experiment tracker the configuration asks for.
///
/// Returns `None` when tracking is disabled and on non-reporting workers.
/// When tracking is enabled but this build has no tracker, every worker
/// fails here, before any training step runs.
pub async fn open_tracker(
    config: &TrainingConfig,
    is_reporter: bool,
) -> Result<Option<Box<dyn ExperimentTracker>>> {
    if !config.use_tracking {
        return Ok(None);
    }

    #[cfg(not(feature = "tracking"))]
    {
        let _ = is_reporter;
        Err(Error::TrackerUnavailable {
            reason: "use_tracking is set but this build lacks the `tracking` feature".to_string(),
        })
    }

    #[cfg(feature = "tracking")]
    {
        if !is_reporter {
            return Ok(None);
        }

        info!(
            project = %config.tracking_project,
            run_id = %config.tracking_run_id,
            dir = %config.tracking_dir,
            "Experiment tracking is enabled"
        );
        let tracker = JsonlTracker::open(
            &config.tracking_dir,
            &config.tracking_project,
            &config.tracking_run_id,
            RunConfig::from(config),
        )
        .await
        .map_err(|e| Error::TrackerUnavailable {
            reason: e.to_string(),
        })?;
        Ok(Some(Box::new(tracker)))
    }
}

#[cfg(feature = "tracking")]
mod jsonl {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use runtime_core::{Error, ExperimentTracker, Result, Step, TrackerFields, TrainingConfig};
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};
    use tokio::fs::{File, OpenOptions};
    use tokio::io::AsyncWriteExt;
    use tracing::debug;

    /// Hyperparameters recorded once per run
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct RunConfig {
        pub learning_rate: f64,
        pub steps: u64,
        pub batch_size: u64,
    }

    impl From<&TrainingConfig> for RunConfig {
        fn from(config: &TrainingConfig) -> Self {
            Self {
                learning_rate: config.learning_rate,
                steps: config.num_steps,
                batch_size: config.batch_size,
            }
        }
    }

    /// One line of the run log
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    enum Record {
        Run {
            project: String,
            run_id: String,
            timestamp: DateTime<Utc>,
            config: RunConfig,
        },
        Metrics {
            step: Step,
            timestamp: DateTime<Utc>,
            metrics: TrackerFields,
        },
    }

    /// Append-only JSON-lines run log at `<dir>/<project>/<run_id>.jsonl`.
    ///
    /// Reopening the same run id appends, so a resumed job continues its run.
    pub struct JsonlTracker {
        path: PathBuf,
        file: File,
    }

    impl JsonlTracker {
        pub async fn open(
            dir: impl AsRef<Path>,
            project: &str,
            run_id: &str,
            config: RunConfig,
        ) -> Result<Self> {
            let run_dir = dir.as_ref().join(project);
            tokio::fs::create_dir_all(&run_dir).await?;

            let path = run_dir.join(format!("{}.jsonl", run_id));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;

            let mut tracker = Self { path, file };
            tracker
                .append(&Record::Run {
                    project: project.to_string(),
                    run_id: run_id.to_string(),
                    timestamp: Utc::now(),
                    config,
                })
                .await?;

            debug!(path = %tracker.path.display(), "Opened experiment run log");
            Ok(tracker)
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        async fn append(&mut self, record: &Record) -> Result<()> {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            self.file
                .write_all(&line)
                .await
                .map_err(|e| Error::Tracker {
                    message: format!("write to {} failed: {}", self.path.display(), e),
                })?;
            self.file.flush().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ExperimentTracker for JsonlTracker {
        async fn log(&mut self, fields: &TrackerFields, step: Step) -> Result<()> {
            self.append(&Record::Metrics {
                step,
                timestamp: Utc::now(),
                metrics: fields.clone(),
            })
            .await
        }
    }

}
