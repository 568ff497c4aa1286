// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parallel top-down traversal.
//!
//! A walk visits the root on the calling thread, then fans child subtrees out as tasks on
//! a rayon pool. A pool hands out at most one permit per worker thread, shared by every
//! walk running on it, and a child is spawned only while a permit is free. Otherwise,
//! and always for the last child, the subtree is visited in-line. Every queued task
//! therefore has an idle worker to run it, so a walk whose tasks block (on a full
//! results channel, say) never starves another walk on the same pool. The walk returns
//! once every spawned task has finished.
//!
//! Parents are visited before their children; siblings are unordered.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::{Scope, ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::BuildError;
use crate::node::{NodeId, NodeView};
use crate::tree::Tree;
use crate::types::Bounded;

/// Per-node callback of [`Octree::traverse`](crate::Octree::traverse).
///
/// `visit` is called once for each reached node. Returning `None` prunes the subtree;
/// returning a visitor continues into every child with it. A visitor may hand back
/// itself or switch to a different one for the levels below.
///
/// Visitors run concurrently on worker threads and must not touch the octree they are
/// visiting through its public API: the walk holds the read lock, so a write from a
/// visitor deadlocks.
pub trait Visitor<T: ?Sized>: Send + Sync {
    /// Visit `node` and choose how to continue below it.
    fn visit(self: Arc<Self>, node: &NodeView<'_, T>) -> Option<Arc<dyn Visitor<T>>>;
}

/// A [`Visitor`] from a closure returning whether to descend.
pub struct FnVisitor<F>(pub F);

impl<T, F> Visitor<T> for FnVisitor<F>
where
    T: ?Sized + 'static,
    F: Fn(&NodeView<'_, T>) -> bool + Send + Sync + 'static,
{
    fn visit(self: Arc<Self>, node: &NodeView<'_, T>) -> Option<Arc<dyn Visitor<T>>> {
        if (self.0)(node) { Some(self) } else { None }
    }
}

impl<F> core::fmt::Debug for FnVisitor<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnVisitor").finish_non_exhaustive()
    }
}

/// Live spawned tasks on rayon's global pool, across every octree using it.
static GLOBAL_LIVE: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
enum Threads {
    /// rayon's global pool, sized to the number of logical processors.
    Global,
    Dedicated { pool: ThreadPool, live: AtomicUsize },
}

/// Threads executing subtree visits, with a cap on tasks in flight.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    threads: Threads,
    max_live: usize,
}

impl WorkerPool {
    pub(crate) fn new(workers: Option<usize>) -> Result<Self, BuildError> {
        let Some(n) = workers else {
            return Ok(Self {
                threads: Threads::Global,
                max_live: rayon::current_num_threads(),
            });
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("octree-worker-{i}"))
            .build()?;
        debug!(workers = n, "octree worker pool built");
        Ok(Self {
            threads: Threads::Dedicated {
                pool,
                live: AtomicUsize::new(0),
            },
            max_live: n,
        })
    }

    fn live(&self) -> &AtomicUsize {
        match &self.threads {
            Threads::Global => &GLOBAL_LIVE,
            Threads::Dedicated { live, .. } => live,
        }
    }

    /// Claim a task slot, or `None` when every worker already has a task.
    fn try_permit(&self) -> Option<Permit<'_>> {
        let live = self.live();
        live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < self.max_live).then_some(n + 1)
        })
        .ok()
        .map(|_| Permit(live))
    }

    fn in_place_scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&Scope<'scope>) -> R,
    {
        match &self.threads {
            Threads::Global => rayon::in_place_scope(op),
            Threads::Dedicated { pool, .. } => pool.in_place_scope(op),
        }
    }
}

/// A claimed task slot, released on drop (including unwinding).
struct Permit<'a>(&'a AtomicUsize);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Walk `tree` from its root with `visitor`, returning when the whole walk is done.
///
/// The caller holds the tree's read lock for the duration; worker tasks only borrow the
/// tree and never lock.
pub(crate) fn walk<T>(tree: &Tree<T>, pool: &WorkerPool, visitor: Arc<dyn Visitor<T>>)
where
    T: Bounded + Send + Sync + ?Sized,
{
    pool.in_place_scope(|s| visit_subtree(s, pool, tree, tree.root(), visitor));
}

fn visit_subtree<'scope, T>(
    s: &Scope<'scope>,
    pool: &'scope WorkerPool,
    tree: &'scope Tree<T>,
    id: NodeId,
    visitor: Arc<dyn Visitor<T>>,
) where
    T: Bounded + Send + Sync + ?Sized,
{
    let node = tree.view(id);
    let Some(next) = visitor.visit(&node) else {
        return;
    };
    let mut children = node.children().peekable();
    while let Some(child) = children.next() {
        if children.peek().is_some()
            && let Some(permit) = pool.try_permit()
        {
            let next = Arc::clone(&next);
            s.spawn(move |s| {
                let _permit = permit;
                visit_subtree(s, pool, tree, child, next);
            });
            continue;
        }
        visit_subtree(s, pool, tree, child, Arc::clone(&next));
    }
}
