// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_octree --heading-base-level=0

//! Understory Octree: a dynamically growing 3D octree with parallel region searches.
//!
//! Understory Octree is a spatial index for bounded objects such as renderable
//! primitives, colliders, and particles.
//!
//! - Add, remove, and update shared objects (`Arc<T>` where `T:` [`Bounded`]).
//! - The root grows outward on demand, so no world size has to be known up front.
//! - Stream the objects inside or touching a region into a channel, in parallel and
//!   cancelable at any point, or stream every object nearest first with a [`Distancer`].
//! - Regions compose: boxes, spheres, and view frusta, combined with [`Not`], [`And`],
//!   and [`Complement`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use glam::DVec3;
//! use understory_octree::{Aabb3D, Octree, Sphere, crossbeam_channel};
//!
//! let tree = Octree::new(8, Aabb3D::EMPTY);
//! let a = Arc::new(Aabb3D::cube(DVec3::ZERO, 0.5));
//! let b = Arc::new(Aabb3D::cube(DVec3::new(40.0, 0.0, 0.0), 0.5));
//! tree.add(Arc::clone(&a));
//! tree.add(Arc::clone(&b));
//! assert!(tree.bounds().contains(&b));
//!
//! // Blocking search on the calling thread and the worker pool.
//! let near = tree.collect_in(Sphere::new(DVec3::ZERO, 2.0));
//! assert_eq!(near.len(), 1);
//! assert!(Arc::ptr_eq(&near[0], &a));
//!
//! // Streaming search in the background.
//! let (tx, rx) = crossbeam_channel::bounded(32);
//! let search = tree
//!     .search_intersect(Aabb3D::cube(DVec3::ZERO, 100.0).into(), tx, crossbeam_channel::never())
//!     .unwrap();
//! assert_eq!(rx.iter().count(), 2);
//! search.join();
//!
//! // Moving an object reuses its slot when it stays in the same bucket.
//! let moved = Arc::new(Aabb3D::cube(DVec3::splat(0.1), 0.5));
//! assert!(tree.update(&a, Arc::clone(&moved)));
//! assert!(tree.has(&moved) && !tree.has(&a));
//! ```
//!
//! ## Layout
//!
//! Every node owns a cubic region, up to eight children, and nine buckets of objects: one
//! per octant for objects that would fit a child that does not exist yet, plus
//! [`STRADDLE_BUCKET`] for objects crossing the node's mid-planes. A node splits once it
//! holds `split_factor` objects, pushing each populated octant bucket into a new child.
//! Straddlers never move down. Nodes left with neither objects nor children are removed.
//!
//! ## Concurrency
//!
//! The tree sits behind one read/write lock. Writers are serialized; searches and
//! [`Octree::traverse`] hold the read lock for the whole walk and fan subtrees out over a
//! rayon pool (the global pool, or a dedicated one via [`OctreeConfig::workers`]).
//!
//! ### Float semantics
//!
//! Coordinates are `f64` and must be finite. Boxes are closed: touching faces overlap.

pub mod config;
pub mod error;
pub mod node;
pub mod octant;
pub mod octree;
pub mod predicate;
pub mod search;
pub mod traversal;
pub mod types;

mod tree;

pub use crossbeam_channel;

pub use config::OctreeConfig;
pub use error::{BuildError, InvariantViolation, SearchError};
pub use node::{NUM_BUCKETS, NodeId, NodeView, STRADDLE_BUCKET};
pub use octant::{OctantBits, OctantId};
pub use octree::Octree;
pub use predicate::{And, Complement, Container, Distancer, Intersector, Not, Predicate};
pub use search::SearchHandle;
pub use traversal::{FnVisitor, Visitor};
pub use types::{Aabb3D, Bounded, Frustum, Sphere};
