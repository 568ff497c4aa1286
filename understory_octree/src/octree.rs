// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The thread-safe octree handle.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossbeam_channel::{Receiver, Sender};
use tracing::error;

use crate::config::OctreeConfig;
use crate::error::{BuildError, InvariantViolation, SearchError};
use crate::node::{NodeView, ObjectKey};
use crate::predicate::{Container, Distancer, Predicate};
use crate::search::{self, ChannelSink, Collect, InVisitor, IntersectVisitor, SearchHandle};
use crate::traversal::{self, FnVisitor, Visitor, WorkerPool};
use crate::tree::Tree;
use crate::types::{Aabb3D, Bounded};

struct Shared<T: ?Sized> {
    tree: RwLock<Tree<T>>,
    pool: WorkerPool,
}

/// A dynamically growing octree over shared, bounded objects.
///
/// Objects are stored as `Arc<T>` and identified by allocation: two `Arc`s pointing at
/// equal values are distinct objects. The root grows outward as objects are added
/// beyond it and never shrinks.
///
/// The handle is cheap to clone; clones share the same tree. Writers (`add`, `remove`,
/// `update`, `clear`) are serialized behind a single read/write lock. Searches and
/// traversals hold the read lock for their whole walk, so a writer waits for running
/// searches to finish. In particular, do not write to the tree while leaving a search's
/// results channel full and unread: the search cannot finish until it is drained or
/// canceled.
pub struct Octree<T: ?Sized> {
    shared: Arc<Shared<T>>,
}

impl<T: ?Sized> Clone for Octree<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Octree<T>
where
    T: Bounded + Send + Sync + ?Sized + 'static,
{
    /// Create an octree with the given split factor and starting root region, using
    /// defaults for everything else.
    ///
    /// # Panics
    ///
    /// Panics if `split_factor` is zero or `initial_bounds` is neither empty nor a box
    /// with positive extent on every axis.
    pub fn new(split_factor: usize, initial_bounds: Aabb3D) -> Self {
        let config = OctreeConfig {
            split_factor,
            initial_bounds,
            ..Default::default()
        };
        match Self::with_config(config) {
            Ok(tree) => tree,
            Err(e) => panic!("invalid octree parameters: {e}"),
        }
    }

    /// Create an octree from a full configuration.
    pub fn with_config(config: OctreeConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let pool = WorkerPool::new(config.workers)?;
        Ok(Self {
            shared: Arc::new(Shared {
                tree: RwLock::new(Tree::new(&config)),
                pool,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Tree<T>> {
        self.shared
            .tree
            .read()
            .expect("octree lock poisoned by a panicking writer")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree<T>> {
        self.shared
            .tree
            .write()
            .expect("octree lock poisoned by a panicking writer")
    }

    /// Insert `object`, expanding the root until it fits.
    ///
    /// Adding an object that is already indexed refreshes its cached bounds.
    ///
    /// # Panics
    ///
    /// Panics if the object's bounds are not finite.
    pub fn add(&self, object: Arc<T>) {
        self.write().add(object);
    }

    /// Remove `object`. Returns false if it was not indexed.
    pub fn remove(&self, object: &Arc<T>) -> bool {
        self.write().remove(ObjectKey::of(object))
    }

    /// Replace `old` with `new`, reusing `old`'s slot when `new`'s bounds land in the same
    /// bucket. Returns false, leaving the tree untouched, if `old` was not indexed.
    ///
    /// Pass the same `Arc` twice to refresh an object whose bounds changed.
    pub fn update(&self, old: &Arc<T>, new: Arc<T>) -> bool {
        self.write().update(ObjectKey::of(old), new)
    }

    /// Whether `object` is indexed.
    pub fn has(&self, object: &Arc<T>) -> bool {
        self.read().has(ObjectKey::of(object))
    }

    /// Number of indexed objects.
    pub fn num_objects(&self) -> usize {
        self.read().num_objects()
    }

    /// Number of nodes, including the root.
    pub fn num_nodes(&self) -> usize {
        self.read().num_nodes()
    }

    /// Whether no objects are indexed.
    pub fn is_empty(&self) -> bool {
        self.num_objects() == 0
    }

    /// Bounds of the root; empty until the first object is added to a tree created with
    /// empty bounds.
    pub fn bounds(&self) -> Aabb3D {
        let tree = self.read();
        tree.view(tree.root()).bounds()
    }

    /// Drop every object and node. The root keeps its current bounds.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Walk the tree top-down with `visitor`, in parallel on the worker pool.
    ///
    /// Blocks until every visited subtree is done. See [`Visitor`] for the contract.
    pub fn traverse(&self, visitor: Arc<dyn Visitor<T>>) {
        let tree = self.read();
        traversal::walk(&tree, &self.shared.pool, visitor);
    }

    /// [`traverse`](Self::traverse) with a closure that returns whether to descend.
    pub fn traverse_fn<F>(&self, f: F)
    where
        F: Fn(&NodeView<'_, T>) -> bool + Send + Sync + 'static,
    {
        self.traverse(Arc::new(FnVisitor(f)));
    }

    /// Start streaming every object fully inside `region` into `results`.
    ///
    /// Returns immediately. `results` is closed when the search ends: after the last match,
    /// on cancellation, or when its receiver is dropped. A value on `cancel`, or dropping
    /// its sender, cancels the search; pass [`crossbeam_channel::never`] for a search that
    /// only ends by itself. Each match is sent once, in no particular order.
    ///
    /// # Panics
    ///
    /// Panics if `region` is not the [`Predicate::Container`] variant.
    pub fn search_in(
        &self,
        region: Predicate,
        results: Sender<Arc<T>>,
        cancel: Receiver<()>,
    ) -> Result<SearchHandle, SearchError> {
        let region = match region {
            Predicate::Container(region) => region,
            other => {
                error!(
                    variant = other.variant_name(),
                    "containment search with a non-container region"
                );
                panic!("search_in requires a Container region, got {other:?}");
            }
        };
        let sink = Arc::new(ChannelSink::new(results, cancel));
        let this = self.clone();
        search::spawn(move || this.traverse(Arc::new(InVisitor::new(region, sink))))
    }

    /// Start streaming every object touching `region` into `results`.
    ///
    /// Behaves like [`search_in`](Self::search_in) but accepts either predicate variant.
    /// With a container, subtrees fully inside the region are emitted without testing
    /// their objects.
    pub fn search_intersect(
        &self,
        region: Predicate,
        results: Sender<Arc<T>>,
        cancel: Receiver<()>,
    ) -> Result<SearchHandle, SearchError> {
        let sink = Arc::new(ChannelSink::new(results, cancel));
        let this = self.clone();
        search::spawn(move || this.traverse(Arc::new(IntersectVisitor::new(region, sink))))
    }

    /// Start streaming every object into `results`, nearest to `distancer`'s target first.
    ///
    /// The search runs in rounds over growing distance rings and sends each ring's objects
    /// sorted by distance, so the stream never goes back to a nearer object. Cancellation
    /// and channel closing behave as in [`search_in`](Self::search_in). Objects whose
    /// distance is NaN are never sent.
    pub fn search_closest(
        &self,
        distancer: impl Distancer + 'static,
        results: Sender<Arc<T>>,
        cancel: Receiver<()>,
    ) -> Result<SearchHandle, SearchError> {
        let distancer: Arc<dyn Distancer> = Arc::new(distancer);
        let sink = Arc::new(ChannelSink::new(results, cancel));
        let this = self.clone();
        search::spawn(move || {
            let tree = this.read();
            search::closest(&tree, &this.shared.pool, distancer, &sink);
        })
    }

    /// Every object, nearest to `distancer`'s target first, searched on the calling
    /// thread and the pool.
    pub fn collect_closest(&self, distancer: impl Distancer + 'static) -> Vec<Arc<T>> {
        let sink = Arc::new(Collect::new());
        search::closest(&self.read(), &self.shared.pool, Arc::new(distancer), &sink);
        sink.take()
    }

    /// Every object fully inside `region`, searched on the calling thread and the pool.
    pub fn collect_in(&self, region: impl Container + 'static) -> Vec<Arc<T>> {
        let sink = Arc::new(Collect::new());
        self.traverse(Arc::new(InVisitor::new(Arc::new(region), Arc::clone(&sink))));
        sink.take()
    }

    /// Every object touching `region`, searched on the calling thread and the pool.
    pub fn collect_intersect(&self, region: Predicate) -> Vec<Arc<T>> {
        let sink = Arc::new(Collect::new());
        self.traverse(Arc::new(IntersectVisitor::new(region, Arc::clone(&sink))));
        sink.take()
    }

    /// Verify the structural invariants of the tree.
    ///
    /// Meant for tests and debugging; walks the whole tree under the read lock.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.read().check_invariants()
    }
}

impl<T: ?Sized> core::fmt::Debug for Octree<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("Octree");
        match self.shared.tree.try_read() {
            Ok(tree) => s.field("tree", &*tree),
            Err(_) => s.field("tree", &format_args!("<locked>")),
        };
        s.field("pool", &self.shared.pool).finish()
    }
}
