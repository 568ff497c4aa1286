// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node arena and the structural algorithms: placement, splitting, expansion, condensation.
//!
//! Nothing here locks; [`Octree`](crate::Octree) wraps a [`Tree`] in its read/write lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{error, trace};

use crate::config::OctreeConfig;
use crate::error::InvariantViolation;
use crate::node::{Entry, Node, NodeId, NodeView, ObjectKey, bucket_of};
use crate::octant::OctantId;
use crate::types::{Aabb3D, Bounded};

pub(crate) struct Tree<T: ?Sized> {
    nodes: Vec<Option<Node<T>>>, // slots
    generations: Vec<u32>,       // last generation per slot (persists across frees)
    free_list: Vec<usize>,
    root: NodeId,
    by_object: HashMap<ObjectKey, NodeId>,
    num_objects: usize,
    num_nodes: usize,
    split_factor: usize,
    max_depth: u32,
    root_scale: f64,
}

impl<T: ?Sized> core::fmt::Debug for Tree<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tree")
            .field("root_bounds", &self.node(self.root).bounds)
            .field("num_objects", &self.num_objects)
            .field("num_nodes", &self.num_nodes)
            .field("arena_slots", &self.nodes.len())
            .field("split_factor", &self.split_factor)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Tree<T> {
    pub(crate) fn new(config: &OctreeConfig) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            root: NodeId::new(0, 0),
            by_object: HashMap::new(),
            num_objects: 0,
            num_nodes: 1,
            split_factor: config.split_factor,
            max_depth: config.max_depth,
            root_scale: config.root_scale,
        };
        tree.root = tree.alloc(config.initial_bounds, 0, None);
        tree
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn num_objects(&self) -> usize {
        self.num_objects
    }

    pub(crate) fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub(crate) fn has(&self, key: ObjectKey) -> bool {
        self.by_object.contains_key(&key)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node<T> {
        self.nodes[id.idx()]
            .as_ref()
            .filter(|n| n.generation == id.1)
            .expect("dangling octree node handle")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        self.nodes[id.idx()]
            .as_mut()
            .filter(|n| n.generation == id.1)
            .expect("dangling octree node handle")
    }

    pub(crate) fn view(&self, id: NodeId) -> NodeView<'_, T> {
        NodeView::new(id, self.node(id))
    }

    fn alloc(&mut self, bounds: Aabb3D, level: i32, parent: Option<NodeId>) -> NodeId {
        let idx = if let Some(idx) = self.free_list.pop() {
            self.generations[idx] = self.generations[idx].saturating_add(1);
            idx
        } else {
            self.nodes.push(None);
            self.generations.push(1);
            self.nodes.len() - 1
        };
        let generation = self.generations[idx];
        self.nodes[idx] = Some(Node::new(generation, bounds, level, parent));
        #[allow(
            clippy::cast_possible_truncation,
            reason = "NodeId uses 32-bit indices by design."
        )]
        NodeId::new(idx as u32, generation)
    }

    fn free(&mut self, id: NodeId) {
        self.nodes[id.idx()] = None;
        self.free_list.push(id.idx());
    }

    /// Insert `object`, growing the root as needed.
    ///
    /// An object that is already indexed is removed first, so adding twice refreshes its
    /// cached bounds instead of duplicating it.
    pub(crate) fn add(&mut self, object: Arc<T>)
    where
        T: Bounded,
    {
        let key = ObjectKey::of(&object);
        if self.has(key) {
            self.remove(key);
        }
        let bounds = object.bounds();
        self.grow_root(&bounds);
        self.place_from(self.root, Entry { object, bounds });
    }

    /// Expand the root until it contains `b`.
    fn grow_root(&mut self, b: &Aabb3D) {
        assert!(
            b.min.is_finite() && b.max.is_finite(),
            "octree objects must have finite bounds, got {b:?}"
        );
        while !self.node(self.root).bounds.contains(b) || self.node(self.root).bounds.is_empty() {
            let _ = self.expand(b);
        }
    }

    /// Grow the root one step toward `towards`.
    ///
    /// An empty root is initialized to a cube around `towards` and `None` is returned.
    /// Otherwise the root doubles in the direction of `towards` and the new root is
    /// returned; a root holding nothing grows in place instead of gaining a parent.
    pub(crate) fn expand(&mut self, towards: &Aabb3D) -> Option<NodeId> {
        let old = self.root;
        let (bounds, level, vacant) = {
            let n = self.node(old);
            (n.bounds, n.level, n.is_vacant())
        };

        if bounds.is_empty() {
            let extent = towards.size().max_element();
            let half = if extent > 0.0 {
                extent * self.root_scale
            } else {
                self.root_scale
            };
            let cube = Aabb3D::cube(towards.center(), half);
            trace!(bounds = ?cube, "octree root initialized");
            self.node_mut(old).bounds = cube;
            return None;
        }

        let growth = OctantId::toward(towards.center() - bounds.center());
        let size = bounds.size();
        let mut grown = bounds;
        if growth.is_left() {
            grown.min.x -= size.x;
        } else {
            grown.max.x += size.x;
        }
        if growth.is_back() {
            grown.max.y += size.y;
        } else {
            grown.min.y -= size.y;
        }
        if growth.is_bottom() {
            grown.min.z -= size.z;
        } else {
            grown.max.z += size.z;
        }

        if vacant {
            trace!(bounds = ?grown, "octree root grown in place");
            self.node_mut(old).bounds = grown;
            return None;
        }

        let parent = self.alloc(grown, level - 1, None);
        self.node_mut(parent).children[growth.opposite().index()] = Some(old);
        self.node_mut(old).parent = Some(parent);
        self.root = parent;
        self.num_nodes += 1;
        trace!(bounds = ?grown, level = level - 1, "octree root expanded");
        Some(parent)
    }

    /// Deepest node under `start` whose bounds hold `b`, and the octant of `b` inside it.
    pub(crate) fn find_place(&self, start: NodeId, b: &Aabb3D) -> (NodeId, Option<OctantId>) {
        let mut id = start;
        loop {
            let node = self.node(id);
            let Some(octant) = node.child_fits(b) else {
                return (id, None);
            };
            match node.children[octant.index()] {
                Some(child) if self.node(child).bounds.contains(b) => id = child,
                // A child that misses `b` only by rounding: keep `b` here as a straddler.
                Some(_) => return (id, None),
                None => return (id, Some(octant)),
            }
        }
    }

    /// Store `entry` in the deepest fitting node under `start`, then split that node if
    /// it reached the split factor. Returns the node finally holding the entry.
    fn place_from(&mut self, start: NodeId, entry: Entry<T>) -> NodeId {
        let (place, octant) = self.find_place(start, &entry.bounds);
        let key = entry.key();
        self.node_mut(place).buckets[bucket_of(octant)].push(entry);
        self.by_object.insert(key, place);
        self.num_objects += 1;
        let _ = self.split(place);
        self.by_object[&key]
    }

    /// Push every populated octant bucket of `id` into a fresh child.
    ///
    /// Does nothing below the split factor or at the depth limit. Returns the number of
    /// children created. The straddle bucket never moves.
    pub(crate) fn split(&mut self, id: NodeId) -> usize {
        let root_level = self.node(self.root).level;
        let (level, occupancy) = {
            let n = self.node(id);
            (n.level, n.num_objects())
        };
        let depth = i64::from(level) - i64::from(root_level);
        if occupancy < self.split_factor || depth >= i64::from(self.max_depth) {
            return 0;
        }

        let mut created = 0;
        for octant in OctantId::ALL {
            let k = octant.index();
            let n = self.node(id);
            if n.children[k].is_some() || n.buckets[k].is_empty() {
                continue;
            }
            let child_bounds = n.child_bounds(octant);
            let entries = core::mem::take(&mut self.node_mut(id).buckets[k]);
            let child = self.alloc(child_bounds, level + 1, Some(id));
            self.node_mut(id).children[k] = Some(child);
            for entry in entries {
                let key = entry.key();
                let c = self.node_mut(child);
                let bucket = bucket_of(c.child_fits(&entry.bounds));
                c.buckets[bucket].push(entry);
                self.by_object.insert(key, child);
            }
            created += 1;
        }
        self.num_nodes += created;
        if created > 0 {
            trace!(level, created, "octree node split");
        }
        created
    }

    /// Remove the object with identity `key`. Returns false when it is not indexed.
    pub(crate) fn remove(&mut self, key: ObjectKey) -> bool {
        let Some(place) = self.by_object.remove(&key) else {
            return false;
        };
        let (bucket, slot) = self.locate(place, key);
        let _ = self.node_mut(place).buckets[bucket].remove(slot);
        self.num_objects -= 1;
        self.condense(place);
        true
    }

    /// Replace the object `old` with `new`, reusing `old`'s slot when `new` lands in the
    /// same bucket. Returns false when `old` is not indexed.
    pub(crate) fn update(&mut self, old: ObjectKey, new: Arc<T>) -> bool
    where
        T: Bounded,
    {
        if !self.has(old) {
            return false;
        }
        let new_key = ObjectKey::of(&new);
        if new_key != old && self.has(new_key) {
            self.remove(new_key);
        }
        let place = self.by_object[&old];
        let (bucket, slot) = self.locate(place, old);
        let bounds = new.bounds();

        let node = self.node(place);
        let fits_node = node.bounds.contains(&bounds);
        let target = bucket_of(node.child_fits(&bounds));
        let _ = self.by_object.remove(&old);

        if fits_node && target == bucket {
            self.node_mut(place).buckets[bucket][slot] = Entry {
                object: new,
                bounds,
            };
            self.by_object.insert(new_key, place);
            return true;
        }

        let _ = self.node_mut(place).buckets[bucket].remove(slot);
        self.num_objects -= 1;
        let entry = Entry {
            object: new,
            bounds,
        };
        if fits_node {
            let _ = self.place_from(place, entry);
        } else {
            self.grow_root(&bounds);
            let _ = self.place_from(self.root, entry);
        }
        self.condense(place);
        true
    }

    /// Bucket and slot of `key` in `place`; a miss means the back-index is corrupt.
    fn locate(&self, place: NodeId, key: ObjectKey) -> (usize, usize) {
        match self.node(place).position(key) {
            Some(found) => found,
            None => {
                error!(?place, ?key, "object indexed at a node that does not hold it");
                panic!("octree invariant violated: object {key:?} missing from node {place:?}");
            }
        }
    }

    /// Destroy `id` and then its ancestors for as long as they hold nothing.
    pub(crate) fn condense(&mut self, id: NodeId) {
        let mut id = id;
        while id != self.root {
            let node = self.node(id);
            if !node.is_vacant() {
                return;
            }
            let Some(parent) = node.parent else {
                return;
            };
            let p = self.node_mut(parent);
            if let Some(slot) = p.children.iter_mut().find(|c| **c == Some(id)) {
                *slot = None;
            }
            self.free(id);
            self.num_nodes -= 1;
            id = parent;
        }
    }

    /// Drop every object and node, keeping the root's bounds and level.
    pub(crate) fn clear(&mut self) {
        let (bounds, level) = {
            let r = self.node(self.root);
            (r.bounds, r.level)
        };
        // Recycle every slot; generations keep counting across a clear.
        self.free_list.clear();
        for (idx, slot) in self.nodes.iter_mut().enumerate().rev() {
            *slot = None;
            self.free_list.push(idx);
        }
        self.by_object.clear();
        self.num_objects = 0;
        self.num_nodes = 1;
        self.root = self.alloc(bounds, level, None);
    }

    /// Verify the structural invariants, reporting the first violation found.
    pub(crate) fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let fail = |msg: String| Err(InvariantViolation(msg));
        let mut seen = HashSet::new();
        let mut nodes = 0;
        let mut objects = 0;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            nodes += 1;
            if id != self.root && node.is_vacant() {
                return fail(format!("{id:?} holds neither objects nor children"));
            }
            for (k, child) in node.children.iter().enumerate() {
                let Some(child) = *child else { continue };
                if !node.buckets[k].is_empty() {
                    return fail(format!("{id:?} has child {k} and a non-empty bucket {k}"));
                }
                let c = self.node(child);
                if c.parent != Some(id) || c.level != node.level + 1 {
                    return fail(format!("{child:?} is not linked to parent {id:?}"));
                }
                if !node.bounds.contains(&c.bounds) {
                    return fail(format!("{child:?} escapes the bounds of {id:?}"));
                }
                stack.push(child);
            }
            for (bucket, entries) in node.buckets.iter().enumerate() {
                for e in entries {
                    let key = e.key();
                    objects += 1;
                    if !seen.insert(key) {
                        return fail(format!("{key:?} stored more than once"));
                    }
                    if self.by_object.get(&key) != Some(&id) {
                        return fail(format!("back-index for {key:?} does not point at {id:?}"));
                    }
                    if !node.bounds.contains(&e.bounds) {
                        return fail(format!("{key:?} escapes the bounds of {id:?}"));
                    }
                    let fits = node.child_fits(&e.bounds);
                    if bucket_of(fits) != bucket {
                        return fail(format!("{key:?} in bucket {bucket} of {id:?} but fits {fits:?}"));
                    }
                }
            }
        }
        if nodes != self.num_nodes {
            return fail(format!("counted {nodes} nodes, recorded {}", self.num_nodes));
        }
        if objects != self.num_objects || objects != self.by_object.len() {
            return fail(format!(
                "counted {objects} objects, recorded {} with {} back-index entries",
                self.num_objects,
                self.by_object.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::STRADDLE_BUCKET;
    use glam::DVec3;

    fn tree(split_factor: usize, initial_bounds: Aabb3D) -> Tree<Aabb3D> {
        Tree::new(&OctreeConfig {
            split_factor,
            initial_bounds,
            ..Default::default()
        })
    }

    fn unit_root() -> Aabb3D {
        Aabb3D::new(DVec3::splat(-1.0), DVec3::splat(1.0))
    }

    fn small(x: f64, y: f64, z: f64) -> Arc<Aabb3D> {
        Arc::new(Aabb3D::new(
            DVec3::new(x, y, z),
            DVec3::new(x + 0.1, y + 0.1, z + 0.1),
        ))
    }

    #[test]
    fn first_insert_bootstraps_empty_root() {
        let mut t = tree(100, Aabb3D::EMPTY);
        let a = Arc::new(Aabb3D::new(DVec3::splat(2.0), DVec3::splat(3.0)));
        t.add(Arc::clone(&a));
        let root = t.node(t.root());
        assert_eq!(root.bounds, Aabb3D::cube(DVec3::splat(2.5), 32.0));
        assert_eq!(t.num_nodes(), 1);
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn point_object_into_empty_root() {
        let mut t = tree(100, Aabb3D::EMPTY);
        t.add(Arc::new(Aabb3D::EMPTY));
        assert!(!t.node(t.root()).bounds.is_empty());
        assert_eq!(t.num_objects(), 1);
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn expansion_nests_old_root_and_lowers_level() {
        let mut t = tree(100, unit_root());
        t.add(small(0.2, 0.2, 0.2));
        let old_root = t.root();
        t.add(small(3.0, 3.0, 3.0));
        assert_ne!(t.root(), old_root);
        let root = t.node(t.root());
        assert!(root.bounds.contains(&unit_root()));
        assert_eq!(root.level, -2, "two doublings reach 3.1");
        assert_eq!(t.num_nodes(), 3);
        assert_eq!(t.view(old_root).level(), 0);
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn expanding_a_vacant_root_grows_in_place() {
        let mut t = tree(100, unit_root());
        t.add(small(10.0, 10.0, 10.0));
        assert_eq!(t.num_nodes(), 1);
        assert!(t.node(t.root()).bounds.contains(&small(10.0, 10.0, 10.0)));
    }

    #[test]
    fn split_pushes_octant_buckets_into_children() {
        let mut t = tree(4, unit_root());
        let objs = [
            small(-0.9, -0.9, 0.1),
            small(-0.7, -0.8, 0.3),
            small(-0.4, -0.2, 0.6),
            small(-0.3, -0.6, 0.8),
        ];
        for o in &objs[..3] {
            t.add(Arc::clone(o));
        }
        assert_eq!(t.num_nodes(), 1, "below the split factor");
        t.add(Arc::clone(&objs[3]));
        assert_eq!(t.num_nodes(), 2);
        let root = t.node(t.root());
        let child = root.children[OctantId::LeftFrontTop.index()].expect("octant 0 child");
        assert!(root.buckets.iter().all(Vec::is_empty));
        assert_eq!(t.view(child).num_objects(), 4);
        assert_eq!(t.view(child).level(), 1);
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn straddlers_never_move_on_split() {
        let mut t = tree(2, unit_root());
        let across = Arc::new(Aabb3D::cube(DVec3::ZERO, 0.1));
        t.add(Arc::clone(&across));
        t.add(small(0.5, 0.5, 0.5));
        let root = t.node(t.root());
        assert_eq!(root.buckets[STRADDLE_BUCKET].len(), 1);
        assert_eq!(t.num_nodes(), 2);
        assert_eq!(t.by_object[&ObjectKey::of(&across)], t.root());
    }

    #[test]
    fn split_stops_at_depth_limit() {
        let mut t = Tree::new(&OctreeConfig {
            split_factor: 1,
            max_depth: 3,
            initial_bounds: unit_root(),
            ..Default::default()
        });
        for _ in 0..8 {
            t.add(small(0.1, 0.1, 0.1));
        }
        assert!(t.num_nodes() <= 4, "one node per level at most");
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn remove_condenses_to_root() {
        let mut t = tree(2, unit_root());
        let objs: Vec<_> = (0..6)
            .map(|i| small(-0.9 + 0.3 * f64::from(i), 0.2, -0.5))
            .collect();
        for o in &objs {
            t.add(Arc::clone(o));
        }
        assert!(t.num_nodes() > 1);
        for o in &objs {
            assert!(t.remove(ObjectKey::of(o)));
            assert!(t.check_invariants().is_ok());
        }
        assert!(!t.remove(ObjectKey::of(&objs[0])), "already removed");
        assert_eq!((t.num_objects(), t.num_nodes()), (0, 1));
    }

    #[test]
    fn update_fast_path_keeps_slot() {
        let mut t = tree(100, unit_root());
        let a = small(0.2, 0.2, 0.2);
        t.add(Arc::clone(&a));
        let b = small(0.3, 0.3, 0.3);
        assert!(t.update(ObjectKey::of(&a), Arc::clone(&b)));
        let root = t.node(t.root());
        assert_eq!(root.position(ObjectKey::of(&b)), Some((OctantId::RightBackTop.index(), 0)));
        assert!(!t.has(ObjectKey::of(&a)));
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn update_changes_bucket_within_node() {
        let mut t = tree(100, unit_root());
        let a = small(0.2, 0.2, 0.2);
        t.add(Arc::clone(&a));
        let across = Arc::new(Aabb3D::cube(DVec3::ZERO, 0.2));
        assert!(t.update(ObjectKey::of(&a), Arc::clone(&across)));
        let root = t.node(t.root());
        assert_eq!(root.position(ObjectKey::of(&across)), Some((STRADDLE_BUCKET, 0)));
        assert_eq!(t.num_objects(), 1);
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn update_outside_root_expands() {
        let mut t = tree(100, unit_root());
        let a = small(0.2, 0.2, 0.2);
        let keep = small(-0.5, -0.5, -0.5);
        t.add(Arc::clone(&a));
        t.add(Arc::clone(&keep));
        let far = small(40.0, -40.0, 40.0);
        assert!(t.update(ObjectKey::of(&a), Arc::clone(&far)));
        assert!(t.node(t.root()).bounds.contains(&far));
        assert_eq!(t.num_objects(), 2);
        assert!(t.check_invariants().is_ok());
        assert!(!t.update(ObjectKey::of(&a), small(0.0, 0.0, 0.0)), "old identity is gone");
    }

    #[test]
    fn re_adding_refreshes_instead_of_duplicating() {
        let mut t = tree(100, unit_root());
        let a = small(0.2, 0.2, 0.2);
        t.add(Arc::clone(&a));
        t.add(Arc::clone(&a));
        assert_eq!(t.num_objects(), 1);
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn clear_keeps_root_bounds() {
        let mut t = tree(2, unit_root());
        for i in 0..5 {
            t.add(small(-0.9 + 0.35 * f64::from(i), 0.1, 0.1));
        }
        let bounds = t.node(t.root()).bounds;
        t.clear();
        assert_eq!((t.num_objects(), t.num_nodes()), (0, 1));
        assert_eq!(t.node(t.root()).bounds, bounds);
        assert!(t.check_invariants().is_ok());
    }

    fn all_ids(t: &Tree<Aabb3D>) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut stack = vec![t.root()];
        while let Some(id) = stack.pop() {
            ids.push(id);
            stack.extend(t.view(id).children());
        }
        ids
    }

    #[test]
    fn handles_from_before_clear_stay_stale() {
        let mut t = tree(2, unit_root());
        for i in 0..5 {
            t.add(small(-0.9 + 0.35 * f64::from(i), 0.1, 0.1));
        }
        let before = all_ids(&t);
        assert!(before.len() > 1);
        t.clear();
        for i in 0..5 {
            t.add(small(-0.9 + 0.35 * f64::from(i), 0.1, 0.1));
        }
        let after = all_ids(&t);
        assert!(
            after.iter().all(|id| !before.contains(id)),
            "a node id was reused across clear"
        );
        assert_eq!(t.check_invariants(), Ok(()));
    }
}
