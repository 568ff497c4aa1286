// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Region searches built on the traversal engine.
//!
//! Each search is a [`Visitor`] that prunes subtrees the region misses and hands matches
//! to an emitter. Once a node is fully covered by a container region, the walk switches
//! to a visitor that emits whole subtrees with no further tests.
//!
//! The channel emitter interleaves blocked sends with the cancel signal. A search stops
//! as soon as any worker sees cancellation (a value or a disconnect on the cancel
//! channel) or the result receiver goes away; the first worker to notice drops an
//! internal stop sender, which wakes every other worker blocked in a send.
//!
//! A closest-first search runs in rounds over growing distance rings. Each round walks
//! the tree for the objects in its ring, sorts them by distance, and emits them before
//! the next ring is searched, so results arrive nearest first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, select};

use crate::error::SearchError;
use crate::node::NodeView;
use crate::predicate::{Container, Distancer, Predicate};
use crate::traversal::{self, Visitor, WorkerPool};
use crate::tree::Tree;
use crate::types::Bounded;

/// Destination of search matches.
pub(crate) trait Emit<T: ?Sized>: Send + Sync {
    /// Deliver one match. Returns false once the search must stop.
    fn emit(&self, object: &Arc<T>) -> bool;

    /// Whether the search has been told to stop.
    fn stopped(&self) -> bool;
}

/// Sends matches into a bounded channel, racing each blocked send against cancellation.
pub(crate) struct ChannelSink<T: ?Sized> {
    results: Sender<Arc<T>>,
    cancel: Receiver<()>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    stopped: AtomicBool,
}

impl<T: ?Sized> ChannelSink<T> {
    pub(crate) fn new(results: Sender<Arc<T>>, cancel: Receiver<()>) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        Self {
            results,
            cancel,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            stopped: AtomicBool::new(false),
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        // Disconnecting the stop channel wakes every blocked sender.
        drop(
            self.stop_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }
}

impl<T: ?Sized + Send + Sync> Emit<T> for ChannelSink<T> {
    fn emit(&self, object: &Arc<T>) -> bool {
        if self.stopped() {
            return false;
        }
        match self.results.try_send(Arc::clone(object)) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => {
                self.stop();
                return false;
            }
            Err(TrySendError::Full(_)) => {}
        }
        select! {
            send(self.results, Arc::clone(object)) -> sent => {
                if sent.is_err() {
                    self.stop();
                }
                sent.is_ok()
            }
            recv(self.cancel) -> _ => {
                self.stop();
                false
            }
            recv(self.stop_rx) -> _ => false,
        }
    }

    fn stopped(&self) -> bool {
        if self.stopped.load(Ordering::Relaxed) {
            return true;
        }
        match self.cancel.try_recv() {
            Err(TryRecvError::Empty) => false,
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.stop();
                true
            }
        }
    }
}

/// Gathers matches into a vector; never stops early.
pub(crate) struct Collect<T: ?Sized>(Mutex<Vec<Arc<T>>>);

impl<T: ?Sized> Collect<T> {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }

    pub(crate) fn take(&self) -> Vec<Arc<T>> {
        core::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: ?Sized + Send + Sync> Emit<T> for Collect<T> {
    fn emit(&self, object: &Arc<T>) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(object));
        true
    }

    fn stopped(&self) -> bool {
        false
    }
}

fn emit_node<T: ?Sized, E: Emit<T>>(node: &NodeView<'_, T>, emit: &E) -> bool {
    node.objects().all(|o| emit.emit(o))
}

/// Emits every object of every node it reaches.
pub(crate) struct EmitAll<E> {
    emit: Arc<E>,
}

impl<T, E> Visitor<T> for EmitAll<E>
where
    T: ?Sized + 'static,
    E: Emit<T> + 'static,
{
    fn visit(self: Arc<Self>, node: &NodeView<'_, T>) -> Option<Arc<dyn Visitor<T>>> {
        if self.emit.stopped() || !emit_node(node, &*self.emit) {
            return None;
        }
        Some(self)
    }
}

/// Emits objects fully inside a container region.
pub(crate) struct InVisitor<E> {
    region: Arc<dyn Container>,
    emit: Arc<E>,
}

impl<E> InVisitor<E> {
    pub(crate) fn new(region: Arc<dyn Container>, emit: Arc<E>) -> Self {
        Self { region, emit }
    }
}

impl<T, E> Visitor<T> for InVisitor<E>
where
    T: ?Sized + 'static,
    E: Emit<T> + 'static,
{
    fn visit(self: Arc<Self>, node: &NodeView<'_, T>) -> Option<Arc<dyn Visitor<T>>> {
        if self.emit.stopped() {
            return None;
        }
        let b = node.bounds();
        if !self.region.intersects(&b) {
            return None;
        }
        if self.region.contains(&b) {
            if !emit_node(node, &*self.emit) {
                return None;
            }
            return Some(Arc::new(EmitAll {
                emit: Arc::clone(&self.emit),
            }));
        }
        for (object, bounds) in node.entries() {
            if self.region.contains(&bounds) && !self.emit.emit(object) {
                return None;
            }
        }
        Some(self)
    }
}

/// Emits objects touching a region of either variant.
pub(crate) struct IntersectVisitor<E> {
    region: Predicate,
    emit: Arc<E>,
}

impl<E> IntersectVisitor<E> {
    pub(crate) fn new(region: Predicate, emit: Arc<E>) -> Self {
        Self { region, emit }
    }
}

impl<T, E> Visitor<T> for IntersectVisitor<E>
where
    T: ?Sized + 'static,
    E: Emit<T> + 'static,
{
    fn visit(self: Arc<Self>, node: &NodeView<'_, T>) -> Option<Arc<dyn Visitor<T>>> {
        if self.emit.stopped() {
            return None;
        }
        let b = node.bounds();
        if !self.region.intersects(&b) {
            return None;
        }
        if let Some(container) = self.region.as_container()
            && container.contains(&b)
        {
            if !emit_node(node, &*self.emit) {
                return None;
            }
            return Some(Arc::new(EmitAll {
                emit: Arc::clone(&self.emit),
            }));
        }
        for (object, bounds) in node.entries() {
            if self.region.intersects(&bounds) && !self.emit.emit(object) {
                return None;
            }
        }
        Some(self)
    }
}

/// Gathers the objects whose distance lies in `[inner, outer)`; the last ring has an
/// infinite `outer` and also takes objects at infinite distance.
struct RingVisitor<T: ?Sized, E> {
    distancer: Arc<dyn Distancer>,
    inner: f64,
    outer: f64,
    found: Mutex<Vec<(f64, Arc<T>)>>,
    emit: Arc<E>,
}

impl<T: ?Sized, E> RingVisitor<T, E> {
    fn holds(&self, d: f64) -> bool {
        d >= self.inner && (d < self.outer || self.outer == f64::INFINITY)
    }
}

impl<T, E> Visitor<T> for RingVisitor<T, E>
where
    T: ?Sized + Send + Sync + 'static,
    E: Emit<T> + 'static,
{
    fn visit(self: Arc<Self>, node: &NodeView<'_, T>) -> Option<Arc<dyn Visitor<T>>> {
        if self.emit.stopped() || self.distancer.distance(&node.bounds()) > self.outer {
            return None;
        }
        let hits: Vec<_> = node
            .entries()
            .filter_map(|(object, bounds)| {
                let d = self.distancer.distance(&bounds);
                self.holds(d).then(|| (d, Arc::clone(object)))
            })
            .collect();
        if !hits.is_empty() {
            self.found
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(hits);
        }
        Some(self)
    }
}

/// Emit every object nearest first, one distance ring at a time.
///
/// The first ring reaches a sixteenth of the root's width past the root itself; each
/// later ring is twice as wide as the one before. The search ends once every object has
/// been emitted, after the unbounded ring, or when `emit` stops.
pub(crate) fn closest<T, E>(
    tree: &Tree<T>,
    pool: &WorkerPool,
    distancer: Arc<dyn Distancer>,
    emit: &Arc<E>,
) where
    T: Bounded + Send + Sync + ?Sized + 'static,
    E: Emit<T> + 'static,
{
    let total = tree.num_objects();
    if total == 0 {
        return;
    }
    let root = tree.view(tree.root()).bounds();
    let mut width = root.size().max_element() / 16.0;
    if !(width.is_finite() && width > 0.0) {
        width = 1.0;
    }
    let mut inner = f64::NEG_INFINITY;
    let mut outer = distancer.distance(&root) + width;
    let mut sent = 0;
    let mut rounds = 0_u32;
    loop {
        if !outer.is_finite() {
            outer = f64::INFINITY;
        }
        let ring = Arc::new(RingVisitor {
            distancer: Arc::clone(&distancer),
            inner,
            outer,
            found: Mutex::new(Vec::new()),
            emit: Arc::clone(emit),
        });
        traversal::walk(tree, pool, Arc::clone(&ring) as Arc<dyn Visitor<T>>);
        let mut found =
            core::mem::take(&mut *ring.found.lock().unwrap_or_else(PoisonError::into_inner));
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        rounds += 1;
        for (_, object) in &found {
            if !emit.emit(object) {
                return;
            }
        }
        sent += found.len();
        if sent >= total || outer == f64::INFINITY || emit.stopped() {
            break;
        }
        inner = outer;
        width *= 2.0;
        outer += width;
    }
    tracing::trace!(rounds, sent, total, "closest-first search done");
}

/// A search running in the background.
///
/// Dropping the handle detaches the search; it still ends when the walk completes, the
/// cancel signal fires, or the results receiver is dropped.
#[derive(Debug)]
pub struct SearchHandle {
    thread: JoinHandle<()>,
}

impl SearchHandle {
    /// Whether the search has finished and closed its results channel.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the search has finished.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the search, e.g. from a predicate.
    pub fn join(self) {
        if let Err(payload) = self.thread.join() {
            std::panic::resume_unwind(payload);
        }
    }
}

/// Run `work` on a fresh search thread.
pub(crate) fn spawn<F>(work: F) -> Result<SearchHandle, SearchError>
where
    F: FnOnce() + Send + 'static,
{
    let thread = thread::Builder::new()
        .name("octree-search".into())
        .spawn(work)?;
    Ok(SearchHandle { thread })
}
