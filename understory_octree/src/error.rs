// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! Misuse of the API (mismatched predicate variants, corrupted internal state) panics;
//! only environmental failures are reported through these types.

use thiserror::Error;

use crate::types::Aabb3D;

/// Failure to build an [`Octree`](crate::Octree) from an [`OctreeConfig`](crate::OctreeConfig).
#[derive(Debug, Error)]
pub enum BuildError {
    /// `split_factor` was zero.
    #[error("split factor must be at least 1")]
    InvalidSplitFactor,
    /// `root_scale` was below 2 or not finite.
    #[error("root scale must be a finite value of at least 2, got {0}")]
    InvalidRootScale(f64),
    /// `workers` was `Some(0)`.
    #[error("a dedicated worker pool needs at least one thread")]
    InvalidWorkerCount,
    /// `initial_bounds` was neither empty nor a box with positive finite extent.
    #[error("initial bounds must be empty or have positive extent on every axis, got {0:?}")]
    InvalidInitialBounds(Aabb3D),
    /// The dedicated worker pool could not be created.
    #[error("failed to build worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Failure to launch a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The thread driving the search could not be spawned.
    #[error("failed to spawn search thread")]
    Spawn(#[from] std::io::Error),
}

/// Description of the first broken structural invariant, from
/// [`Octree::check_invariants`](crate::Octree::check_invariants).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("octree invariant violated: {0}")]
pub struct InvariantViolation(pub(crate) String);
