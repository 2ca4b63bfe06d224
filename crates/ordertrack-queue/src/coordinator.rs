//! Forwards registry subscription intents onto the task queue.

use crate::queue::DynQueue;
use ordertrack_core::SubscriptionTask;
use ordertrack_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Spawn the coordinator. Runs until shutdown or until the registry drops
/// its intent sender.
pub fn spawn_coordinator(
    mut intents: mpsc::UnboundedReceiver<SubscriptionTask>,
    queue: DynQueue,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Subscription coordinator started");
        loop {
            let task = tokio::select! {
                () = shutdown.cancelled() => break,
                task = intents.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let outcome = match enqueue(queue.as_ref(), &task).await {
                Ok(()) => {
                    debug!(task = %task, "Subscription task enqueued");
                    "enqueued"
                }
                Err(e) => {
                    error!(?e, task = %task, "Failed to enqueue subscription task");
                    "enqueue_failed"
                }
            };
            Metrics::queue_task(task.kind(), outcome);
        }
        info!("Subscription coordinator stopped");
    })
}

async fn enqueue(
    queue: &dyn crate::queue::TaskQueue,
    task: &SubscriptionTask,
) -> crate::error::QueueResult<()> {
    queue.send(task.to_body()?).await
}
