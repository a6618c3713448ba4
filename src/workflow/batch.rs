//! Concurrent execution of independent workflow runs.

use futures::stream::{self, StreamExt};
use tracing::info;

use super::pipeline::{WorkflowPipeline, WorkflowRequest};
use super::result::WorkflowResult;

/// Run each request through the pipeline, at most `concurrency` at a time.
/// Results come back in request order.
pub async fn run_batch(
    pipeline: &WorkflowPipeline,
    requests: Vec<WorkflowRequest>,
    concurrency: usize,
) -> Vec<WorkflowResult> {
    let total = requests.len();
    info!("Running batch of {} workflows ({} concurrent)", total, concurrency.max(1));

    let mut results: Vec<(usize, WorkflowResult)> = stream::iter(requests.into_iter().enumerate())
        .map(|(index, request)| async move { (index, pipeline.execute(request).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}
