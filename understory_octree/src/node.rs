// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Octree nodes: a cubic region with up to eight children and nine object buckets.

use std::sync::Arc;

use crate::octant::{OctantBits, OctantId};
use crate::types::{Aabb3D, Bounded};

/// Bucket holding objects that straddle at least one mid-plane of their node.
pub const STRADDLE_BUCKET: usize = 8;

/// Number of buckets per node: one per octant plus [`STRADDLE_BUCKET`].
pub const NUM_BUCKETS: usize = 9;

/// Opaque identifier for a node in the tree.
///
/// Handles are only good for comparing nodes seen during traversals; no API looks a node
/// up by id. A slot index plus a generation counter, so a handle to a condensed or
/// cleared node never equals a node created later in the same slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) u32, pub(crate) u32);

impl NodeId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Identity of an indexed object: the address of its `Arc` allocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct ObjectKey(usize);

impl ObjectKey {
    pub(crate) fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        Self(Arc::as_ptr(object).cast::<()>().addr())
    }
}

/// A bucket entry: the object and the bounds observed when it was placed.
pub(crate) struct Entry<T: ?Sized> {
    pub(crate) object: Arc<T>,
    pub(crate) bounds: Aabb3D,
}

impl<T: ?Sized> Entry<T> {
    pub(crate) fn key(&self) -> ObjectKey {
        ObjectKey::of(&self.object)
    }
}

pub(crate) struct Node<T: ?Sized> {
    pub(crate) generation: u32,
    pub(crate) bounds: Aabb3D,
    pub(crate) level: i32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; 8],
    pub(crate) buckets: [Vec<Entry<T>>; NUM_BUCKETS],
}

impl<T: ?Sized> Node<T> {
    pub(crate) fn new(generation: u32, bounds: Aabb3D, level: i32, parent: Option<NodeId>) -> Self {
        Self {
            generation,
            bounds,
            level,
            parent,
            children: [None; 8],
            buckets: core::array::from_fn(|_| Vec::new()),
        }
    }

    pub(crate) fn child_bounds(&self, id: OctantId) -> Aabb3D {
        id.slice(&self.bounds)
    }

    /// The octant whose slice holds `b`, or `None` when `b` straddles a mid-plane.
    ///
    /// A box lying exactly on a mid-plane fits the side it touches. Only the center is
    /// consulted; callers check `bounds.contains(b)` separately.
    pub(crate) fn child_fits(&self, b: &Aabb3D) -> Option<OctantId> {
        let c = self.bounds.center();
        let right = side(b.min.x, b.max.x, c.x)?;
        let back = side(b.min.y, b.max.y, c.y)?;
        let top = side(b.min.z, b.max.z, c.z)?;
        let mut bits = OctantBits::empty();
        bits.set(OctantBits::RIGHT, right);
        bits.set(OctantBits::BACK, back);
        bits.set(OctantBits::BOTTOM, !top);
        Some(OctantId::from_bits(bits))
    }

    pub(crate) fn num_objects(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub(crate) fn num_children(&self) -> usize {
        self.children.iter().flatten().count()
    }

    /// Holds neither objects nor children.
    pub(crate) fn is_vacant(&self) -> bool {
        self.children.iter().all(Option::is_none) && self.buckets.iter().all(Vec::is_empty)
    }

    /// Bucket and slot of the entry for `key`.
    pub(crate) fn position(&self, key: ObjectKey) -> Option<(usize, usize)> {
        self.buckets.iter().enumerate().find_map(|(bucket, entries)| {
            entries
                .iter()
                .position(|e| e.key() == key)
                .map(|slot| (bucket, slot))
        })
    }
}

/// Bucket index for a `child_fits` result.
pub(crate) fn bucket_of(octant: Option<OctantId>) -> usize {
    octant.map_or(STRADDLE_BUCKET, OctantId::index)
}

/// `Some(false)` for the low side of `mid`, `Some(true)` for the high side, `None` when straddling.
fn side(min: f64, max: f64, mid: f64) -> Option<bool> {
    if max <= mid {
        Some(false)
    } else if min >= mid {
        Some(true)
    } else {
        None
    }
}

/// Read-only view of a node, handed to [`Visitor`](crate::Visitor)s during traversal.
pub struct NodeView<'a, T: ?Sized> {
    id: NodeId,
    node: &'a Node<T>,
}

impl<T: ?Sized> Clone for NodeView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for NodeView<'_, T> {}

impl<'a, T: ?Sized> NodeView<'a, T> {
    pub(crate) fn new(id: NodeId, node: &'a Node<T>) -> Self {
        Self { id, node }
    }

    /// Handle of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The cubic region owned by this node.
    pub fn bounds(&self) -> Aabb3D {
        self.node.bounds
    }

    /// Signed level: 0 for the initial root, decreasing on expansion, increasing on split.
    pub fn level(&self) -> i32 {
        self.node.level
    }

    /// Number of objects stored at this node (not counting descendants).
    pub fn num_objects(&self) -> usize {
        self.node.num_objects()
    }

    /// Number of existing children.
    pub fn num_children(&self) -> usize {
        self.node.num_children()
    }

    /// The child occupying `octant`, if any.
    pub fn child(&self, octant: OctantId) -> Option<NodeId> {
        self.node.children[octant.index()]
    }

    /// Handles of the existing children, in octant order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + 'a {
        self.node.children.iter().flatten().copied()
    }

    /// Objects in one bucket together with their cached bounds.
    ///
    /// Buckets `0..8` are the octant buckets; [`STRADDLE_BUCKET`] holds straddling objects.
    ///
    /// # Panics
    ///
    /// Panics if `bucket >= NUM_BUCKETS`.
    pub fn bucket(&self, bucket: usize) -> impl Iterator<Item = (&'a Arc<T>, Aabb3D)> + 'a {
        self.node.buckets[bucket].iter().map(|e| (&e.object, e.bounds))
    }

    /// All objects at this node together with their cached bounds.
    pub fn entries(&self) -> impl Iterator<Item = (&'a Arc<T>, Aabb3D)> + 'a {
        self.node
            .buckets
            .iter()
            .flatten()
            .map(|e| (&e.object, e.bounds))
    }

    /// All objects at this node.
    pub fn objects(&self) -> impl Iterator<Item = &'a Arc<T>> + 'a {
        self.node.buckets.iter().flatten().map(|e| &e.object)
    }
}

impl<T: ?Sized> Bounded for NodeView<'_, T> {
    fn bounds(&self) -> Aabb3D {
        self.node.bounds
    }
}

impl<T: ?Sized> core::fmt::Debug for NodeView<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeView")
            .field("id", &self.id)
            .field("bounds", &self.node.bounds)
            .field("level", &self.node.level)
            .field("objects", &self.node.num_objects())
            .field("children", &self.node.num_children())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn node() -> Node<Aabb3D> {
        Node::new(1, Aabb3D::new(DVec3::splat(-1.0), DVec3::splat(1.0)), 0, None)
    }

    #[test]
    fn child_fits_picks_octant() {
        let n = node();
        let b = Aabb3D::new(DVec3::new(-0.9, -0.9, 0.1), DVec3::new(-0.8, -0.8, 0.2));
        assert_eq!(n.child_fits(&b), Some(OctantId::LeftFrontTop));
        let b = Aabb3D::new(DVec3::new(0.1, 0.1, -0.9), DVec3::new(0.2, 0.2, -0.8));
        assert_eq!(n.child_fits(&b), Some(OctantId::RightBackBottom));
    }

    #[test]
    fn child_fits_rejects_straddlers() {
        let n = node();
        let b = Aabb3D::new(DVec3::new(-0.1, 0.1, 0.1), DVec3::new(0.1, 0.2, 0.2));
        assert_eq!(n.child_fits(&b), None);
        assert_eq!(bucket_of(n.child_fits(&b)), STRADDLE_BUCKET);
    }

    #[test]
    fn boxes_touching_a_mid_plane_fit_their_side() {
        let n = node();
        let b = Aabb3D::new(DVec3::new(0.0, 0.0, 0.0), DVec3::new(0.5, 0.5, 0.5));
        assert_eq!(n.child_fits(&b), Some(OctantId::RightBackTop));
        let b = Aabb3D::new(DVec3::new(-0.5, -0.5, -0.5), DVec3::ZERO);
        assert_eq!(n.child_fits(&b), Some(OctantId::LeftFrontBottom));
        for id in OctantId::ALL {
            let slice = n.child_bounds(id);
            assert_eq!(n.child_fits(&slice), Some(id), "a slice fits its own octant");
        }
    }

    #[test]
    fn position_finds_entry_by_identity() {
        let mut n = node();
        let a = Arc::new(Aabb3D::cube(DVec3::splat(0.5), 0.1));
        let twin = Arc::new(*a);
        n.buckets[3].push(Entry {
            object: Arc::clone(&a),
            bounds: *a,
        });
        assert_eq!(n.position(ObjectKey::of(&a)), Some((3, 0)));
        assert_eq!(n.position(ObjectKey::of(&twin)), None, "equal value, different identity");
        assert_eq!(n.num_objects(), 1);
        assert!(!n.is_vacant());
    }
}
