//! Execution error taxonomy.

use drydock_runtime::RuntimeError;

/// Errors produced while executing a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The job's primary container exited non-zero.
    #[error("job \"{job}\" failed with non-zero exit code {exit_code}")]
    JobExitedNonZero { job: String, exit_code: i64 },

    /// The job was cancelled while its containers were running.
    #[error("in-progress job \"{job}\" aborted")]
    InProgressJobAborted { job: String },

    /// The job was cancelled before it started running.
    #[error("pending job \"{job}\" canceled")]
    PendingJobCanceled { job: String },

    /// An image required by the pipeline could not be pulled.
    #[error("error pulling image \"{image}\": {source}")]
    ImagePullFailed {
        image: String,
        #[source]
        source: RuntimeError,
    },

    /// Host-side failure: daemon plumbing, filesystem work, task panics.
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),

    /// Two or more per-job errors from one pipeline run.
    #[error(transparent)]
    Multi(#[from] MultiError),
}

impl ExecutionError {
    pub(crate) fn infrastructure(err: impl Into<anyhow::Error>, context: String) -> Self {
        Self::Infrastructure(err.into().context(context))
    }

    fn is_pending_cancellation(&self) -> bool {
        matches!(self, Self::PendingJobCanceled { .. })
    }

    /// Fold per-job errors into a single result. Pending-job cancellations
    /// are consequences of some other failure (or of external cancellation);
    /// they are reported only when no causal error accompanies them.
    pub(crate) fn aggregate(mut errors: Vec<ExecutionError>) -> Result<(), ExecutionError> {
        if errors.iter().any(|err| !err.is_pending_cancellation()) {
            errors.retain(|err| !err.is_pending_cancellation());
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ExecutionError::Multi(MultiError::new(errors))),
        }
    }
}

/// An aggregate of two or more execution errors.
#[derive(Debug)]
pub struct MultiError {
    errors: Vec<ExecutionError>,
}

impl MultiError {
    pub(crate) fn new(errors: Vec<ExecutionError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ExecutionError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} errors encountered:", self.errors.len())?;
        for (index, err) in self.errors.iter().enumerate() {
            write!(f, "\n{}. {}", index + 1, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
