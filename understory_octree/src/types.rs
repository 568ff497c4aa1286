// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and the [`Bounded`] capability.
//!
//! All coordinates are `f64`. Only comparisons and basic arithmetic are used, so
//! results are reproducible on any IEEE-754 platform. NaN coordinates are not supported.

use glam::{DMat4, DVec3};

/// Anything that can report an axis-aligned bounding box.
///
/// This is the only contract the octree requires of indexed objects.
/// The returned box must not change between [`Octree::add`](crate::Octree::add) and the
/// matching [`remove`](crate::Octree::remove)/[`update`](crate::Octree::update); if it
/// does, the index still finds the object (it caches the bounds it observed on insertion),
/// but searches keep seeing the stale box until the object is updated.
pub trait Bounded {
    /// The axis-aligned bounding box of this value.
    fn bounds(&self) -> Aabb3D;
}

/// Axis-aligned bounding box in 3D.
///
/// A box is valid when `min <= max` component-wise. Boxes are closed: a box touching
/// another box's face overlaps it and a box sharing a face with its container is inside it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb3D {
    /// Minimum corner.
    pub min: DVec3,
    /// Maximum corner.
    pub max: DVec3,
}

impl Default for Aabb3D {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb3D {
    /// The empty box: both corners at the origin.
    pub const EMPTY: Self = Self {
        min: DVec3::ZERO,
        max: DVec3::ZERO,
    };

    /// Create a new AABB from min/max corners.
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB from its center and half extents.
    pub fn from_center_half_extents(center: DVec3, half: DVec3) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Create a cube centered at `center` with the given half size on every axis.
    pub fn cube(center: DVec3, half_size: f64) -> Self {
        Self::from_center_half_extents(center, DVec3::splat(half_size))
    }

    /// True iff both corners are exactly the origin.
    ///
    /// This is the marker for "no bounds yet", not a volume test: a degenerate box away
    /// from the origin is not empty.
    pub fn is_empty(&self) -> bool {
        self.min == DVec3::ZERO && self.max == DVec3::ZERO
    }

    /// Center point.
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Extent along each axis.
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Whether the point lies inside or on the boundary.
    pub fn contains_point(&self, p: DVec3) -> bool {
        self.min.cmple(p).all() && p.cmple(self.max).all()
    }

    /// Whether `other` lies fully inside this box (faces may touch).
    pub fn contains(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    /// Whether the two boxes share at least one point.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Squared distance from `p` to the closest point of the box; zero when inside.
    pub fn sq_dist_to_point(&self, p: DVec3) -> f64 {
        let below = (self.min - p).max(DVec3::ZERO);
        let above = (p - self.max).max(DVec3::ZERO);
        (below + above).length_squared()
    }

    /// The eight vertices. Bit 0 of the index selects `max.x`, bit 1 `max.y`, bit 2 `max.z`.
    pub fn corners(&self) -> [DVec3; 8] {
        core::array::from_fn(|i| {
            DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Bounded for Aabb3D {
    fn bounds(&self) -> Aabb3D {
        *self
    }
}

/// A sphere given by center and radius.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sphere {
    /// Center point.
    pub center: DVec3,
    /// Radius; expected to be non-negative.
    pub radius: f64,
}

impl Sphere {
    /// Create a new sphere.
    pub const fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Whether the sphere and the box share at least one point.
    pub fn overlaps_box(&self, b: &Aabb3D) -> bool {
        // Real-Time Collision Detection, 5.2.5
        b.sq_dist_to_point(self.center) <= self.radius * self.radius
    }

    /// Whether the box lies fully inside the sphere.
    pub fn contains_box(&self, b: &Aabb3D) -> bool {
        let r2 = self.radius * self.radius;
        b.corners()
            .iter()
            .all(|c| (*c - self.center).length_squared() <= r2)
    }
}

impl Bounded for Sphere {
    fn bounds(&self) -> Aabb3D {
        Aabb3D::cube(self.center, self.radius)
    }
}

/// A view volume described by a combined view-projection matrix.
///
/// Clip space follows the OpenGL convention: a point is visible when its normalized
/// device coordinates lie in `[-1, 1]` on all three axes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum {
    /// Matrix taking world-space points to clip space.
    pub view_proj: DMat4,
}

impl Frustum {
    /// Create a frustum from a world-to-clip matrix.
    pub const fn new(view_proj: DMat4) -> Self {
        Self { view_proj }
    }

    /// Right-handed perspective frustum for a camera at the origin looking down `-Z`.
    pub fn perspective(fov_y_radians: f64, aspect: f64, near: f64, far: f64) -> Self {
        Self::new(DMat4::perspective_rh_gl(fov_y_radians, aspect, near, far))
    }

    /// Pre-multiply a world-to-view matrix, e.g. from [`DMat4::look_at_rh`].
    #[must_use]
    pub fn with_view(self, view: DMat4) -> Self {
        Self::new(self.view_proj * view)
    }

    /// Project `p` to normalized device coordinates.
    ///
    /// Returns `None` when the point falls outside the view volume (including points
    /// behind the eye).
    pub fn project(&self, p: DVec3) -> Option<DVec3> {
        let clip = self.view_proj * p.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        (ndc.abs().max_element() <= 1.0).then_some(ndc)
    }

    /// Bit set of the clip planes `p` lies outside of; zero means inside.
    pub(crate) fn outcode(&self, p: DVec3) -> u8 {
        let c = self.view_proj * p.extend(1.0);
        let mut code = 0;
        for (axis, v) in [c.x, c.y, c.z].into_iter().enumerate() {
            if v < -c.w {
                code |= 1 << (2 * axis);
            }
            if v > c.w {
                code |= 1 << (2 * axis + 1);
            }
        }
        code
    }

    /// Whether the box may be visible.
    ///
    /// Each of the eight corners is classified against the six clip planes; the box is
    /// rejected only when every corner lies outside the same plane. This never misses a
    /// visible box but over-reports boxes near the frustum's edges.
    pub fn overlaps_box(&self, b: &Aabb3D) -> bool {
        b.corners()
            .iter()
            .fold(u8::MAX, |acc, c| acc & self.outcode(*c))
            == 0
    }

    /// Whether all eight corners of the box project inside the view volume.
    pub fn contains_box(&self, b: &Aabb3D) -> bool {
        b.corners().iter().all(|c| self.project(*c).is_some())
    }
}
