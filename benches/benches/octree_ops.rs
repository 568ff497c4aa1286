// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use glam::DVec3;
use understory_octree::crossbeam_channel::{bounded, never};
use understory_octree::{Aabb3D, Frustum, Octree, OctreeConfig, Predicate, Sphere};

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn next_f64(&mut self) -> f64 {
        let v = self.next_u64() >> 11;
        (v as f64) / ((1u64 << 53) as f64)
    }
    fn next_point(&mut self, extent: f64) -> DVec3 {
        DVec3::new(
            (self.next_f64() * 2.0 - 1.0) * extent,
            (self.next_f64() * 2.0 - 1.0) * extent,
            (self.next_f64() * 2.0 - 1.0) * extent,
        )
    }
}

fn gen_random_boxes(count: usize, extent: f64, half: f64) -> Vec<Arc<Aabb3D>> {
    let mut rng = Rng::new(0xCAFE_F00D_DEAD_BEEF);
    (0..count)
        .map(|_| Arc::new(Aabb3D::cube(rng.next_point(extent), half)))
        .collect()
}

fn gen_clustered_boxes(n_clusters: usize, per_cluster: usize, spread: f64) -> Vec<Arc<Aabb3D>> {
    let mut rng = Rng::new(0xC1A5_7E55_9999_ABCD);
    let mut out = Vec::with_capacity(n_clusters * per_cluster);
    for _ in 0..n_clusters {
        let center = rng.next_point(1000.0);
        for _ in 0..per_cluster {
            out.push(Arc::new(Aabb3D::cube(center + rng.next_point(spread), 0.5)));
        }
    }
    out
}

fn populated(boxes: &[Arc<Aabb3D>], split_factor: usize) -> Octree<Aabb3D> {
    let tree = Octree::with_config(OctreeConfig {
        split_factor,
        ..Default::default()
    })
    .expect("valid config");
    for b in boxes {
        tree.add(Arc::clone(b));
    }
    tree
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for &n in &[1_000usize, 10_000, 50_000] {
        let boxes = gen_random_boxes(n, 1.0, 0.005);
        group.throughput(Throughput::Elements(n as u64));
        for &split in &[16usize, 100] {
            group.bench_function(format!("random_n{n}_split{split}"), |b| {
                b.iter_batched(
                    || {
                        Octree::<Aabb3D>::with_config(OctreeConfig {
                            split_factor: split,
                            ..Default::default()
                        })
                        .expect("valid config")
                    },
                    |tree| {
                        for o in &boxes {
                            tree.add(Arc::clone(o));
                        }
                        black_box(tree.num_nodes());
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }
    let clustered = gen_clustered_boxes(32, 512, 20.0);
    group.throughput(Throughput::Elements(clustered.len() as u64));
    group.bench_function("clustered_expanding", |b| {
        b.iter_batched(
            || Octree::<Aabb3D>::new(100, Aabb3D::EMPTY),
            |tree| {
                for o in &clustered {
                    tree.add(Arc::clone(o));
                }
                black_box(tree.num_nodes());
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_update_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    let boxes = gen_random_boxes(20_000, 1.0, 0.005);
    group.throughput(Throughput::Elements(boxes.len() as u64));
    // Small jitter keeps most objects in their bucket (slot reuse); large jitter forces
    // re-placement and condensation.
    for &(name, step) in &[("jitter_small", 0.001), ("jitter_large", 0.25)] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let moved: Vec<_> = boxes
                        .iter()
                        .map(|o| {
                            let d = DVec3::splat(step);
                            Arc::new(Aabb3D::new(o.min + d, o.max + d))
                        })
                        .collect();
                    (populated(&boxes, 32), moved)
                },
                |(tree, moved)| {
                    for (old, new) in boxes.iter().zip(&moved) {
                        black_box(tree.update(old, Arc::clone(new)));
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.bench_function("remove_all", |b| {
        b.iter_batched(
            || populated(&boxes, 32),
            |tree| {
                for o in &boxes {
                    black_box(tree.remove(o));
                }
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let boxes = gen_random_boxes(50_000, 1.0, 0.005);
    let tree = populated(&boxes, 32);
    let small = Aabb3D::new(DVec3::new(-0.2, -0.2, -0.1), DVec3::new(0.2, 0.2, 0.1));
    let large = Aabb3D::cube(DVec3::ZERO, 0.8);

    group.bench_function("collect_in_small_box", |b| {
        b.iter(|| black_box(tree.collect_in(small).len()))
    });
    group.bench_function("collect_in_large_box", |b| {
        b.iter(|| black_box(tree.collect_in(large).len()))
    });
    group.bench_function("collect_intersect_sphere", |b| {
        let sphere = Sphere::new(DVec3::new(0.3, -0.3, 0.0), 0.4);
        b.iter(|| black_box(tree.collect_intersect(sphere.into()).len()))
    });
    group.bench_function("search_closest_first_100", |b| {
        let target = DVec3::new(0.4, 0.1, -0.3);
        b.iter(|| {
            let (tx, rx) = bounded(32);
            let search = tree
                .search_closest(target, tx, never())
                .expect("spawn search thread");
            let n = rx.iter().take(100).count();
            drop(rx);
            search.join();
            black_box(n)
        })
    });
    group.bench_function("search_intersect_frustum_streamed", |b| {
        let frustum = Frustum::perspective(1.0, 1.0, 0.1, 10.0)
            .with_view(glam::DMat4::look_at_rh(DVec3::new(0.0, 0.0, 3.0), DVec3::ZERO, DVec3::Y));
        b.iter(|| {
            let (tx, rx) = bounded(32);
            let search = tree
                .search_intersect(Predicate::from(frustum), tx, never())
                .expect("spawn search thread");
            let n = rx.iter().count();
            search.join();
            black_box(n)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_update_churn, bench_search);
criterion_main!(benches);
