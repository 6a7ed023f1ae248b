//! One fan-out helper for both scheduling strategies.

use std::future::Future;

use schoolintel_shared::ExecutionMode;

/// Drive `tasks` to completion and return their outputs in input order.
///
/// `Concurrent` polls every task at once; `Sequential` awaits them one by
/// one. Business logic lives in the tasks, so both modes produce the same
/// outputs for the same inputs.
pub async fn run_all<F, T>(mode: ExecutionMode, tasks: Vec<F>) -> Vec<T>
where
    F: Future<Output = T>,
{
    match mode {
        ExecutionMode::Concurrent => futures::future::join_all(tasks).await,
        ExecutionMode::Sequential => {
            let mut outputs = Vec::with_capacity(tasks.len());
            for task in tasks {
                outputs.push(task.await);
            }
            outputs
        }
    }
}
