//! Chunked fan-out combinator shared by the batch runner and the dispatcher.
//!
//! `fan_out` splits an ordered list into consecutive chunks of at most `limit`
//! items, hands each chunk to an executor strategy, awaits it, and
//! concatenates the per-chunk outputs in order. Chunks run strictly one after
//! another, so at most `limit` items are in flight at any time. The strategy
//! decides how a chunk executes: concurrently on the calling task, on the
//! blocking pool, or by submitting it to a cluster and gathering.

use std::future::Future;
use std::time::Instant;

use tracing::debug;

use crate::error::{FanOutError, Result};

/// One slice of the input handed to an executor strategy.
#[derive(Debug)]
pub struct Chunk<I> {
    /// Position of this chunk among all chunks.
    pub index: usize,
    /// Position of the chunk's first item in the full input.
    pub offset: usize,
    pub items: Vec<I>,
}

impl<I> Chunk<I> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items paired with their index in the full input.
    pub fn into_indexed(self) -> impl Iterator<Item = (usize, I)> {
        let offset = self.offset;
        self.items
            .into_iter()
            .enumerate()
            .map(move |(i, item)| (offset + i, item))
    }
}

/// Runs `items` through `execute_chunk` in consecutive chunks of `limit`.
///
/// The first chunk error aborts the run; chunks after it never start and
/// outputs of chunks before it are dropped.
///
/// # Errors
///
/// Returns `FanOutError::Configuration` if `limit` is zero, otherwise the
/// first error returned by `execute_chunk`.
pub async fn fan_out<I, T, F, Fut>(
    items: Vec<I>,
    limit: usize,
    mut execute_chunk: F,
) -> Result<Vec<T>>
where
    F: FnMut(Chunk<I>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    if limit == 0 {
        return Err(FanOutError::Configuration(
            "concurrency limit must be greater than 0".to_string(),
        ));
    }

    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut remaining = items.into_iter();
    let mut index = 0;
    let mut offset = 0;

    loop {
        let chunk_items: Vec<I> = remaining.by_ref().take(limit).collect();
        if chunk_items.is_empty() {
            break;
        }
        let size = chunk_items.len();
        let started = Instant::now();

        let outputs = execute_chunk(Chunk {
            index,
            offset,
            items: chunk_items,
        })
        .await?;
        debug_assert_eq!(outputs.len(), size, "executor returned a short chunk");

        debug!(
            chunk = index,
            size = size,
            duration_ms = started.elapsed().as_millis() as u64,
            "Chunk completed"
        );

        results.extend(outputs);
        index += 1;
        offset += size;
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_chunks_are_sized_by_limit() {
        let sizes = Mutex::new(Vec::new());
        let out = fan_out((0..10usize).collect(), 3, |chunk| {
            sizes.lock().unwrap().push(chunk.len());
            async move {
                Ok::<_, FanOutError>(chunk.into_indexed().map(|(i, v)| (i, v * 2)).collect())
            }
        })
        .await
        .unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![3, 3, 3, 1]);
        assert_eq!(out.len(), 10);
        for (i, (index, doubled)) in out.into_iter().enumerate() {
            assert_eq!(index, i);
            assert_eq!(doubled, i * 2);
        }
    }

    #[tokio::test]
    async fn test_empty_input_schedules_nothing() {
        let mut calls = 0;
        let out: Vec<u8> = fan_out(Vec::<u8>::new(), 4, |chunk| {
            calls += 1;
            async move { Ok::<_, FanOutError>(chunk.items) }
        })
        .await
        .unwrap();
        assert!(out.is_empty());
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_zero_limit_is_rejected() {
        let err = fan_out(vec![1], 0, |chunk| async move { Ok::<_, FanOutError>(chunk.items) })
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_failing_chunk_stops_later_chunks() {
        let mut seen = Vec::new();
        let err = fan_out((0..9).collect::<Vec<usize>>(), 3, |chunk| {
            seen.push(chunk.index);
            let index = chunk.index;
            async move {
                if index == 1 {
                    Err(FanOutError::unit_failure(chunk.offset, "bad chunk"))
                } else {
                    Ok(chunk.items)
                }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(seen, vec![0, 1]);
        assert!(matches!(err, FanOutError::WorkUnitFailure { index: 3, .. }));
    }
}
