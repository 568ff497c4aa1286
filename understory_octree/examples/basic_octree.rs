// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Basic usage of Understory Octree: populate, move objects, and run searches.

use std::sync::Arc;

use glam::{DMat4, DVec3};
use understory_octree::crossbeam_channel::{bounded, never};
use understory_octree::{Aabb3D, Complement, Frustum, Octree, Predicate, Sphere};

fn main() {
    let tree = Octree::new(16, Aabb3D::EMPTY);

    // A grid of small boxes on the ground plane.
    let mut boxes = Vec::new();
    for i in -10..10 {
        for j in -10..10 {
            let center = DVec3::new(f64::from(i), f64::from(j), 0.0);
            let b = Arc::new(Aabb3D::cube(center, 0.25));
            tree.add(Arc::clone(&b));
            boxes.push(b);
        }
    }
    println!(
        "objects={}, nodes={}, root={:?}",
        tree.num_objects(),
        tree.num_nodes(),
        tree.bounds()
    );

    // Lift one box far above the grid; the root expands to follow it.
    let lifted = Arc::new(Aabb3D::cube(DVec3::new(0.0, 0.0, 500.0), 0.25));
    tree.update(&boxes[0], Arc::clone(&lifted));
    boxes[0] = lifted;
    println!("after lift: nodes={}, root={:?}", tree.num_nodes(), tree.bounds());

    // Everything within 3 units of the origin.
    let near = tree.collect_in(Sphere::new(DVec3::ZERO, 3.0));
    println!("inside sphere: {}", near.len());

    // Everything not fully inside that sphere.
    let far = tree.collect_in(Complement(Sphere::new(DVec3::ZERO, 3.0)));
    println!("outside sphere: {}", far.len());

    // Stream what a camera above the grid can see.
    let view = DMat4::look_at_rh(DVec3::new(0.0, -15.0, 10.0), DVec3::ZERO, DVec3::Z);
    let camera = Frustum::perspective(45_f64.to_radians(), 16.0 / 9.0, 0.1, 100.0).with_view(view);
    let (tx, rx) = bounded(32);
    let search = tree
        .search_intersect(Predicate::from(camera), tx, never())
        .expect("spawn search thread");
    let visible = rx.iter().count();
    search.join();
    println!("visible from camera: {visible}");

    // The five boxes nearest to a point, nearest first.
    let (tx, rx) = bounded(5);
    let search = tree
        .search_closest(DVec3::new(3.3, -2.6, 0.0), tx, never())
        .expect("spawn search thread");
    let nearest: Vec<_> = rx.iter().take(5).map(|b| b.center()).collect();
    drop(rx);
    search.join();
    println!("nearest to (3.3, -2.6): {nearest:?}");

    // Cancel a search after the first few hits.
    let (tx, rx) = bounded(1);
    let (cancel, cancel_rx) = bounded(1);
    let search = tree
        .search_in(Aabb3D::cube(DVec3::ZERO, 1000.0).into(), tx, cancel_rx)
        .expect("spawn search thread");
    let first: Vec<_> = rx.iter().take(3).collect();
    let _ = cancel.send(());
    let rest = rx.iter().count();
    search.join();
    println!("canceled after {} hits ({rest} in flight)", first.len());
}
