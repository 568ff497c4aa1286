// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Search predicates and their combinators.
//!
//! An [`Intersector`] can only answer "does this box touch the region?". A [`Container`]
//! can also answer "is this box fully inside?", which lets a search emit whole subtrees
//! without testing their objects and is required by [`Octree::search_in`](crate::Octree::search_in).
//!
//! [`Aabb3D`], [`Sphere`] and [`Frustum`] are containers out of the box. [`Not`] and [`And`]
//! keep the variant of their inputs, so mixing an intersector into a container
//! expression is a type error. The type-erased [`Predicate`] checks the same rule at run
//! time.
//!
//! A [`Distancer`] ranks boxes by distance instead, for
//! [`Octree::search_closest`](crate::Octree::search_closest).

use std::sync::Arc;

use glam::DVec3;
use tracing::error;

use crate::types::{Aabb3D, Frustum, Sphere};

/// A region that can test boxes for intersection.
///
/// Called concurrently from worker threads; implementations must be pure.
pub trait Intersector: Send + Sync {
    /// Whether `b` shares at least one point with the region.
    fn intersects(&self, b: &Aabb3D) -> bool;
}

/// An [`Intersector`] that can also test boxes for containment.
pub trait Container: Intersector {
    /// Whether `b` lies fully inside the region.
    fn contains(&self, b: &Aabb3D) -> bool;
}

impl Intersector for Aabb3D {
    fn intersects(&self, b: &Aabb3D) -> bool {
        self.overlaps(b)
    }
}

impl Container for Aabb3D {
    fn contains(&self, b: &Aabb3D) -> bool {
        Self::contains(self, b)
    }
}

impl Intersector for Sphere {
    fn intersects(&self, b: &Aabb3D) -> bool {
        self.overlaps_box(b)
    }
}

impl Container for Sphere {
    fn contains(&self, b: &Aabb3D) -> bool {
        self.contains_box(b)
    }
}

impl Intersector for Frustum {
    fn intersects(&self, b: &Aabb3D) -> bool {
        self.overlaps_box(b)
    }
}

impl Container for Frustum {
    fn contains(&self, b: &Aabb3D) -> bool {
        self.contains_box(b)
    }
}

impl<P: Intersector + ?Sized> Intersector for Arc<P> {
    fn intersects(&self, b: &Aabb3D) -> bool {
        (**self).intersects(b)
    }
}

impl<P: Container + ?Sized> Container for Arc<P> {
    fn contains(&self, b: &Aabb3D) -> bool {
        (**self).contains(b)
    }
}

impl<P: Intersector + ?Sized> Intersector for Box<P> {
    fn intersects(&self, b: &Aabb3D) -> bool {
        (**self).intersects(b)
    }
}

impl<P: Container + ?Sized> Container for Box<P> {
    fn contains(&self, b: &Aabb3D) -> bool {
        (**self).contains(b)
    }
}

/// Pointwise negation of both tests.
///
/// This flips each answer in place and is not a set complement: `Not(r).intersects(b)` is
/// false for any `b` touching `r`, even when most of `b` lies outside. A search with a
/// `Not` region therefore prunes every node that touches `r`. Use [`Complement`] for the
/// region outside a container.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Not<P>(pub P);

impl<P: Intersector> Intersector for Not<P> {
    fn intersects(&self, b: &Aabb3D) -> bool {
        !self.0.intersects(b)
    }
}

impl<P: Container> Container for Not<P> {
    fn contains(&self, b: &Aabb3D) -> bool {
        !self.0.contains(b)
    }
}

/// Pointwise conjunction. A container only when both sides are.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct And<P, Q>(pub P, pub Q);

impl<P: Intersector, Q: Intersector> Intersector for And<P, Q> {
    fn intersects(&self, b: &Aabb3D) -> bool {
        self.0.intersects(b) && self.1.intersects(b)
    }
}

impl<P: Container, Q: Container> Container for And<P, Q> {
    fn contains(&self, b: &Aabb3D) -> bool {
        self.0.contains(b) && self.1.contains(b)
    }
}

/// Everything outside a container.
///
/// A box touches the complement unless it lies fully inside the region, and lies inside
/// the complement when it does not touch the region at all.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Complement<P>(pub P);

impl<P: Container> Intersector for Complement<P> {
    fn intersects(&self, b: &Aabb3D) -> bool {
        !self.0.contains(b)
    }
}

impl<P: Container> Container for Complement<P> {
    fn contains(&self, b: &Aabb3D) -> bool {
        !self.0.intersects(b)
    }
}

/// A type-erased search region tagged with its capability.
///
/// [`Octree::search_in`](crate::Octree::search_in) requires the `Container` variant;
/// [`Octree::search_intersect`](crate::Octree::search_intersect) accepts either, and uses
/// containment to skip per-object tests inside fully covered subtrees.
#[derive(Clone)]
pub enum Predicate {
    /// Supports intersection tests only.
    Intersector(Arc<dyn Intersector>),
    /// Supports intersection and containment tests.
    Container(Arc<dyn Container>),
}

impl Predicate {
    /// Wrap a container.
    pub fn container(p: impl Container + 'static) -> Self {
        Self::Container(Arc::new(p))
    }

    /// Wrap a region that can only test intersection.
    pub fn intersector(p: impl Intersector + 'static) -> Self {
        Self::Intersector(Arc::new(p))
    }

    /// Whether this predicate supports containment tests.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container(_))
    }

    /// The container, when this is the `Container` variant.
    pub fn as_container(&self) -> Option<&Arc<dyn Container>> {
        match self {
            Self::Container(c) => Some(c),
            Self::Intersector(_) => None,
        }
    }

    /// Intersection test, whatever the variant.
    pub fn intersects(&self, b: &Aabb3D) -> bool {
        match self {
            Self::Intersector(p) => p.intersects(b),
            Self::Container(p) => p.intersects(b),
        }
    }

    /// Pointwise conjunction with `other`.
    ///
    /// # Panics
    ///
    /// Panics if the two predicates are of different variants.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Container(p), Self::Container(q)) => Self::Container(Arc::new(And(p, q))),
            (Self::Intersector(p), Self::Intersector(q)) => {
                Self::Intersector(Arc::new(And(p, q)))
            }
            (p, q) => {
                error!(
                    left = p.variant_name(),
                    right = q.variant_name(),
                    "mismatched predicate conjunction"
                );
                panic!(
                    "cannot combine predicates of different variants ({} and {})",
                    p.variant_name(),
                    q.variant_name()
                );
            }
        }
    }

    pub(crate) fn variant_name(&self) -> &'static str {
        match self {
            Self::Intersector(_) => "Intersector",
            Self::Container(_) => "Container",
        }
    }
}

impl core::ops::Not for Predicate {
    type Output = Self;

    /// Pointwise negation; see [`Not`]. Keeps the variant.
    fn not(self) -> Self {
        match self {
            Self::Intersector(p) => Self::Intersector(Arc::new(Not(p))),
            Self::Container(p) => Self::Container(Arc::new(Not(p))),
        }
    }
}

impl core::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple(self.variant_name()).finish_non_exhaustive()
    }
}

impl From<Aabb3D> for Predicate {
    fn from(r: Aabb3D) -> Self {
        Self::container(r)
    }
}

impl From<Sphere> for Predicate {
    fn from(s: Sphere) -> Self {
        Self::container(s)
    }
}

impl From<Frustum> for Predicate {
    fn from(f: Frustum) -> Self {
        Self::container(f)
    }
}

/// Measures how far boxes are from a search target, for closest-first searches.
///
/// Units are arbitrary. The distance of a box must never exceed the distance of any box
/// inside it, since a search skips a node whose own distance is already past its
/// current radius. Called concurrently from worker threads; implementations must be
/// pure.
pub trait Distancer: Send + Sync {
    /// Distance from the target to `b`; zero when `b` touches the target.
    fn distance(&self, b: &Aabb3D) -> f64;
}

/// Euclidean distance from the point to the nearest point of the box.
impl Distancer for DVec3 {
    fn distance(&self, b: &Aabb3D) -> f64 {
        b.sq_dist_to_point(*self).sqrt()
    }
}

/// Euclidean gap between the sphere's surface and the box.
impl Distancer for Sphere {
    fn distance(&self, b: &Aabb3D) -> f64 {
        (b.sq_dist_to_point(self.center).sqrt() - self.radius).max(0.0)
    }
}

impl<D: Distancer + ?Sized> Distancer for Arc<D> {
    fn distance(&self, b: &Aabb3D) -> f64 {
        (**self).distance(b)
    }
}

impl<D: Distancer + ?Sized> Distancer for Box<D> {
    fn distance(&self, b: &Aabb3D) -> f64 {
        (**self).distance(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Aabb3D {
        Aabb3D::new(DVec3::splat(-1.0), DVec3::splat(1.0))
    }

    fn inside() -> Aabb3D {
        Aabb3D::cube(DVec3::ZERO, 0.5)
    }

    fn straddling() -> Aabb3D {
        Aabb3D::cube(DVec3::splat(1.0), 0.5)
    }

    fn outside() -> Aabb3D {
        Aabb3D::cube(DVec3::splat(5.0), 0.5)
    }

    /// Passes everything.
    struct Everything;

    impl Intersector for Everything {
        fn intersects(&self, _: &Aabb3D) -> bool {
            true
        }
    }

    #[test]
    fn box_region() {
        let r = region();
        assert!(Container::contains(&r, &inside()));
        assert!(r.intersects(&straddling()));
        assert!(!Container::contains(&r, &straddling()));
        assert!(!r.intersects(&outside()));
    }

    #[test]
    fn not_flips_in_place() {
        let n = Not(region());
        assert!(!n.intersects(&inside()));
        assert!(!n.intersects(&straddling()), "touching the region is enough to fail");
        assert!(n.intersects(&outside()));
        assert!(n.contains(&straddling()));
    }

    #[test]
    fn complement_is_the_outside() {
        let c = Complement(region());
        assert!(!c.intersects(&inside()));
        assert!(c.intersects(&straddling()));
        assert!(!c.contains(&straddling()));
        assert!(c.contains(&outside()));
    }

    #[test]
    fn and_requires_both() {
        let a = And(region(), Sphere::new(DVec3::ZERO, 0.8));
        assert!(a.contains(&Aabb3D::cube(DVec3::ZERO, 0.2)));
        assert!(!a.contains(&inside()), "corners of inside() leave the sphere");
        assert!(a.intersects(&inside()));
        let mixed = And(region(), Everything);
        assert!(mixed.intersects(&straddling()));
    }

    #[test]
    fn predicate_combinators_keep_variant() {
        let p = Predicate::from(region()).and(Sphere::new(DVec3::ZERO, 10.0).into());
        assert!(p.is_container());
        let c = p.as_container().unwrap();
        assert!(c.contains(&inside()));
        let n = !Predicate::from(region());
        assert!(n.is_container());
        assert!(n.intersects(&outside()));
        let i = Predicate::intersector(Everything).and(Predicate::intersector(Everything));
        assert!(!i.is_container());
        assert!(i.as_container().is_none());
    }

    #[test]
    #[should_panic(expected = "different variants (Container and Intersector)")]
    fn mismatched_and_panics() {
        let _ = Predicate::from(region()).and(Predicate::intersector(Everything));
    }

    #[test]
    fn distances_are_lower_bounds_for_nested_boxes() {
        let outer = Aabb3D::new(DVec3::ZERO, DVec3::splat(2.0));
        let inner = Aabb3D::new(DVec3::splat(1.5), DVec3::splat(2.0));
        let p = DVec3::new(-3.0, 0.5, 0.5);
        // `DVec3` has an inherent point-to-point `distance`.
        assert_eq!(Distancer::distance(&p, &outer), 3.0);
        assert!(Distancer::distance(&p, &outer) <= Distancer::distance(&p, &inner));
        let s = Sphere::new(p, 1.0);
        assert_eq!(s.distance(&outer), 2.0);
        assert_eq!(s.distance(&Aabb3D::cube(p, 0.1)), 0.0, "touching the sphere");
        let boxed: Box<dyn Distancer> = Box::new(p);
        assert_eq!(boxed.distance(&outer), 3.0);
    }
}
