//! Background tasks bound to the connector lifetime.

use crate::connector::Connector;
use crate::domain::{run_guarded, Job};
use shared_types::TracedError;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::error;

impl Connector {
    /// Run `job` in the background. The job is cancelled when the
    /// connector shuts down, and shutdown waits for it to return.
    ///
    /// A panic is caught and logged like an error.
    pub fn spawn<J: Job>(&self, job: J) -> JoinHandle<Result<(), TracedError>> {
        let guard = self.inner.tasks.enter();
        let ctx = self.lifetime_context();
        let job = Arc::new(job);
        tokio::spawn(async move {
            let job_ctx = ctx.clone();
            let result = run_guarded(&ctx, async move { job.run(job_ctx).await }).await;
            drop(guard);
            if let Err(e) = &result {
                if !ctx.is_shutting_down() {
                    error!(status = e.status_code(), error = %e, "Background task failed");
                }
            }
            result
        })
    }

    /// Background tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.inner.tasks.count()
    }
}
