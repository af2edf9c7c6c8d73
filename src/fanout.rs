//! Concurrent segment + count execution for the graph backend.

use crate::error::{EngineError, Result};
use std::future::Future;
use tokio::task::JoinHandle;

/// A spawned query that is aborted when the request stops waiting for it.
struct Task<T>(JoinHandle<T>);

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        // no-op once the task has finished
        self.0.abort();
    }
}

async fn joined<T>(task: &mut Task<Result<T>>) -> Result<T> {
    (&mut task.0)
        .await
        .map_err(|e| EngineError::Execution(anyhow::Error::new(e)))?
}

/// Run `segment` and, when present, `count` as two spawned tasks.
///
/// Returns once both have finished, or with the first error observed. The
/// other task is aborted in that case, and both are aborted when the returned
/// future is dropped. Without a count only the segment task is spawned.
pub async fn fan_out<S, C, SF, CF>(segment: SF, count: Option<CF>) -> Result<(S, Option<C>)>
where
    S: Send + 'static,
    C: Send + 'static,
    SF: Future<Output = Result<S>> + Send + 'static,
    CF: Future<Output = Result<C>> + Send + 'static,
{
    let mut segment = Task(tokio::spawn(segment));
    match count {
        None => Ok((joined(&mut segment).await?, None)),
        Some(count) => {
            let mut count = Task(tokio::spawn(count));
            let (segment, count) = tokio::try_join!(joined(&mut segment), joined(&mut count))?;
            Ok((segment, Some(count)))
        }
    }
}
