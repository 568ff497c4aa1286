// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Construction parameters for [`Octree`](crate::Octree).

use crate::error::BuildError;
use crate::types::Aabb3D;

/// Tuning knobs for an [`Octree`](crate::Octree).
///
/// The defaults are reasonable starting points for scenes with a few thousand objects:
///
/// ```rust
/// use understory_octree::{Aabb3D, OctreeConfig};
///
/// let config = OctreeConfig {
///     split_factor: 16,
///     ..Default::default()
/// };
/// assert_eq!(config.max_depth, 32);
/// assert!(config.initial_bounds.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct OctreeConfig {
    /// A node splits once it holds this many objects. Must be at least 1.
    pub split_factor: usize,
    /// Nodes this many levels below the root never split.
    pub max_depth: u32,
    /// Half-size of the first root, as a multiple of the largest extent of the first
    /// object inserted into an empty tree. Must be at least 2.
    pub root_scale: f64,
    /// Worker threads for traversal. `None` shares rayon's global pool.
    pub workers: Option<usize>,
    /// Starting root region. Either [`Aabb3D::EMPTY`] or a box with positive extent on
    /// every axis.
    pub initial_bounds: Aabb3D,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            split_factor: 100,
            max_depth: 32,
            root_scale: 32.0,
            workers: None,
            initial_bounds: Aabb3D::EMPTY,
        }
    }
}

impl OctreeConfig {
    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.split_factor == 0 {
            return Err(BuildError::InvalidSplitFactor);
        }
        // Also rejects NaN.
        if !(self.root_scale >= 2.0 && self.root_scale.is_finite()) {
            return Err(BuildError::InvalidRootScale(self.root_scale));
        }
        if self.workers == Some(0) {
            return Err(BuildError::InvalidWorkerCount);
        }
        let b = self.initial_bounds;
        let degenerate =
            !(b.min.is_finite() && b.max.is_finite()) || b.size().min_element() <= 0.0;
        if !b.is_empty() && degenerate {
            return Err(BuildError::InvalidInitialBounds(b));
        }
        Ok(())
    }
}
