//! Coarse split of a work list into cluster-sized groups.

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{FanOutError, Result};
use crate::executor::{BatchOptions, BatchRunner, WorkUnit};

/// Default number of groups a work list is split into.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Size of each contiguous group for `len` units across `worker_count` workers.
///
/// `max(ceil(len / worker_count), worker_count)`: small inputs are not split
/// into single-unit groups, and there are never more than `worker_count`
/// groups.
///
/// # Errors
///
/// Returns `FanOutError::Configuration` if `worker_count` is zero.
pub fn group_size(len: usize, worker_count: usize) -> Result<usize> {
    if worker_count == 0 {
        return Err(FanOutError::Configuration(
            "worker_count must be greater than 0".to_string(),
        ));
    }
    Ok(len.div_ceil(worker_count).max(worker_count))
}

/// A contiguous slice of a work list, run as one unit of cluster work.
///
/// The group captures its units together with the runner and options, so a
/// cluster worker only has to call [`WorkGroup::invoke`].
pub struct WorkGroup<T> {
    index: usize,
    offset: usize,
    units: Vec<WorkUnit<T>>,
    runner: BatchRunner,
    options: BatchOptions,
}

impl<T: Send + 'static> WorkGroup<T> {
    pub fn new(
        index: usize,
        offset: usize,
        units: Vec<WorkUnit<T>>,
        runner: BatchRunner,
        options: BatchOptions,
    ) -> Self {
        Self {
            index,
            offset,
            units,
            runner,
            options,
        }
    }

    /// Position of this group among all groups.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the group's first unit in the full work list.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Runs the group's units through the batch runner.
    ///
    /// Unit indices in errors refer to the full work list, not the group.
    pub fn invoke(self) -> BoxFuture<'static, Result<Vec<T>>> {
        let Self {
            offset,
            units,
            runner,
            options,
            ..
        } = self;

        async move {
            runner
                .run(units, &options)
                .await
                .map_err(|e| e.rebase(offset))
        }
        .boxed()
    }
}

impl<T> std::fmt::Debug for WorkGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGroup")
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("len", &self.units.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Splits `units` into contiguous groups sized by [`group_size`].
///
/// Groups keep input order; the last one may be shorter and none is empty.
///
/// # Errors
///
/// Returns `FanOutError::Configuration` for a zero worker count or patch size.
pub fn partition<T: Send + 'static>(
    units: Vec<WorkUnit<T>>,
    worker_count: usize,
    runner: &BatchRunner,
    options: &BatchOptions,
) -> Result<Vec<WorkGroup<T>>> {
    options.validate()?;
    let size = group_size(units.len(), worker_count)?;

    let mut groups = Vec::new();
    let mut remaining = units.into_iter();
    let mut offset = 0;

    loop {
        let slice: Vec<WorkUnit<T>> = remaining.by_ref().take(size).collect();
        if slice.is_empty() {
            break;
        }
        let len = slice.len();
        groups.push(WorkGroup::new(
            groups.len(),
            offset,
            slice,
            runner.clone(),
            *options,
        ));
        offset += len;
    }

    Ok(groups)
}
