// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Euclidean cluster extraction over a 3D spatial hash.
//!
//! Divides 3D space into voxels of size `distance_threshold`, hashes each
//! point into its voxel, and queries the 27 adjacent voxels (3×3×3) for
//! neighbor searches. Clusters are the connected components of the graph
//! linking points no further than the threshold apart, grown by BFS from the
//! lowest unvisited index. This gives O(n) average performance for uniform
//! distributions.
//!
//! The hash stores voxel keys in an open-addressed table and point indices in
//! a contiguous array grouped by voxel, built in two passes (count, then
//! scatter). Query order is fixed by point order, so results do not depend on
//! hashing details.

use crate::{config::ClusterParams, lidar::PointCloud};
use tracing::{debug, instrument};

// ── Section 1: FlatSpatialHash (open-addressing, contiguous storage) ────────

const INITIAL_TABLE_SIZE: usize = 4096;
/// Maximum load factor before table must grow. At 0.75, linear probing
/// averages ~2.5 probes per lookup.
const MAX_LOAD_FACTOR: f32 = 0.75;

/// Flat-array spatial hash with open-addressing and contiguous point storage.
struct FlatSpatialHash {
    /// Voxel key per slot, meaningful only where `bucket_used` is set.
    bucket_keys: Vec<(i32, i32, i32)>,
    /// Slot occupancy. Every key value is a reachable voxel, so emptiness
    /// is tracked separately.
    bucket_used: Vec<bool>,
    /// Start index into `point_indices` for each bucket.
    bucket_offsets: Vec<u32>,
    /// Number of points in each bucket.
    bucket_counts: Vec<u32>,
    /// Write cursor per bucket (used during scatter pass).
    bucket_cursors: Vec<u32>,
    /// Contiguous per-voxel point indices.
    point_indices: Vec<u32>,
    /// `table_size - 1` for fast modulo.
    mask: u32,
    inv_cell_size: f32,
    /// Occupied slots in insertion order, for fast clear and prefix sums.
    occupied: Vec<u32>,
    /// Current table capacity (always a power of 2).
    table_size: usize,
}

impl FlatSpatialHash {
    fn new(cell_size: f32) -> Self {
        Self {
            bucket_keys: vec![(0, 0, 0); INITIAL_TABLE_SIZE],
            bucket_used: vec![false; INITIAL_TABLE_SIZE],
            bucket_offsets: vec![0; INITIAL_TABLE_SIZE],
            bucket_counts: vec![0; INITIAL_TABLE_SIZE],
            bucket_cursors: vec![0; INITIAL_TABLE_SIZE],
            point_indices: Vec::new(),
            mask: (INITIAL_TABLE_SIZE - 1) as u32,
            inv_cell_size: 1.0 / cell_size,
            occupied: Vec::new(),
            table_size: INITIAL_TABLE_SIZE,
        }
    }

    fn set_cell_size(&mut self, cell_size: f32) {
        self.inv_cell_size = 1.0 / cell_size;
    }

    fn clear(&mut self) {
        // Only reset occupied buckets: O(occupied), not O(table_size)
        for &slot in &self.occupied {
            let s = slot as usize;
            self.bucket_used[s] = false;
            self.bucket_counts[s] = 0;
            self.bucket_cursors[s] = 0;
        }
        self.occupied.clear();
        self.point_indices.clear();
    }

    /// Size the table for `n_points` so the build never grows it.
    /// Worst case: every point is in a unique voxel.
    fn ensure_capacity(&mut self, n_points: usize) {
        let required = ((n_points as f32 / MAX_LOAD_FACTOR) as usize + 1).next_power_of_two();
        if required > self.table_size {
            self.bucket_keys = vec![(0, 0, 0); required];
            self.bucket_used = vec![false; required];
            self.bucket_offsets = vec![0; required];
            self.bucket_counts = vec![0; required];
            self.bucket_cursors = vec![0; required];
            self.mask = (required - 1) as u32;
            self.table_size = required;
            self.occupied.clear();
        }
    }

    #[inline]
    fn voxel_key(&self, x: f32, y: f32, z: f32) -> (i32, i32, i32) {
        (
            (x * self.inv_cell_size).floor() as i32,
            (y * self.inv_cell_size).floor() as i32,
            (z * self.inv_cell_size).floor() as i32,
        )
    }

    /// FxHash-style hash for voxel keys: wrapping multiply + XOR fold.
    #[inline(always)]
    fn hash_key(&self, key: (i32, i32, i32)) -> u32 {
        let mut h = (key.0 as u32).wrapping_mul(0x9e37_79b9);
        h ^= (key.1 as u32).wrapping_mul(0x517c_c1b7);
        h ^= (key.2 as u32).wrapping_mul(0x6a09_e667);
        h & self.mask
    }

    /// Find or insert a slot for `key` via linear probing.
    fn find_or_insert_slot(&mut self, key: (i32, i32, i32)) -> usize {
        let mut slot = self.hash_key(key) as usize;
        loop {
            if !self.bucket_used[slot] {
                self.bucket_used[slot] = true;
                self.bucket_keys[slot] = key;
                self.occupied.push(slot as u32);
                return slot;
            }
            if self.bucket_keys[slot] == key {
                return slot;
            }
            slot = (slot + 1) & (self.mask as usize);
        }
    }

    /// Read-only lookup. Returns `None` if the voxel is empty.
    #[inline(always)]
    fn find_slot(&self, key: (i32, i32, i32)) -> Option<usize> {
        let mut slot = self.hash_key(key) as usize;
        loop {
            if !self.bucket_used[slot] {
                return None;
            }
            if self.bucket_keys[slot] == key {
                return Some(slot);
            }
            slot = (slot + 1) & (self.mask as usize);
        }
    }

    /// Two-pass build: count points per voxel, compute offsets, scatter indices.
    fn build(&mut self, cloud: &PointCloud) {
        let n = cloud.len();
        self.clear();
        self.ensure_capacity(n);

        // Pass 1: count points per voxel
        for i in 0..n {
            let key = self.voxel_key(cloud.x[i], cloud.y[i], cloud.z[i]);
            let slot = self.find_or_insert_slot(key);
            self.bucket_counts[slot] += 1;
        }

        // Prefix sum to compute offsets
        let mut total: u32 = 0;
        for &slot in &self.occupied {
            let s = slot as usize;
            self.bucket_offsets[s] = total;
            self.bucket_cursors[s] = total;
            total += self.bucket_counts[s];
        }
        self.point_indices.resize(total as usize, 0);

        // Pass 2: scatter point indices into contiguous ranges, ascending
        // within each voxel
        for i in 0..n {
            let key = self.voxel_key(cloud.x[i], cloud.y[i], cloud.z[i]);
            let Some(slot) = self.find_slot(key) else {
                continue;
            };
            let cursor = self.bucket_cursors[slot] as usize;
            self.point_indices[cursor] = i as u32;
            self.bucket_cursors[slot] += 1;
        }
    }

    /// Collect every point within `sqrt(radius_sq)` of point `q`.
    fn query_neighbors(
        &self,
        cloud: &PointCloud,
        q: usize,
        radius_sq: f32,
        neighbors: &mut Vec<usize>,
    ) {
        neighbors.clear();
        let (qx, qy, qz) = (cloud.x[q], cloud.y[q], cloud.z[q]);
        let (cx, cy, cz) = self.voxel_key(qx, qy, qz);

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = (
                        cx.saturating_add(dx),
                        cy.saturating_add(dy),
                        cz.saturating_add(dz),
                    );
                    let Some(slot) = self.find_slot(key) else {
                        continue;
                    };
                    let offset = self.bucket_offsets[slot] as usize;
                    let count = self.bucket_counts[slot] as usize;
                    for &idx in &self.point_indices[offset..offset + count] {
                        let idx = idx as usize;
                        let ddx = cloud.x[idx] - qx;
                        let ddy = cloud.y[idx] - qy;
                        let ddz = cloud.z[idx] - qz;
                        if ddx * ddx + ddy * ddy + ddz * ddz <= radius_sq {
                            neighbors.push(idx);
                        }
                    }
                }
            }
        }
    }
}

// ── Section 2: Cluster extraction ──────────────────────────────────────────

/// Indices into the clustered cloud, ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cluster {
    pub indices: Vec<usize>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

const UNVISITED: u32 = u32::MAX;

/// Reusable state for Euclidean cluster extraction.
///
/// All internal buffers are retained between calls to avoid allocation after
/// the first frame (warmup). No result of one call influences the next.
pub struct ClusterExtractor {
    hash: FlatSpatialHash,
    labels: Vec<u32>,
    queue: Vec<usize>,
    neighbors: Vec<usize>,
}

impl Default for ClusterExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterExtractor {
    pub fn new() -> Self {
        Self {
            hash: FlatSpatialHash::new(1.0),
            labels: Vec::new(),
            queue: Vec::new(),
            neighbors: Vec::new(),
        }
    }

    /// Group `cloud` into clusters of points transitively within
    /// `params.distance_threshold` of each other. Components whose size falls
    /// outside `[min_size, max_size]` are discarded.
    ///
    /// Clusters are returned ordered by their lowest point index.
    #[instrument(skip_all, fields(n = cloud.len()))]
    pub fn extract(&mut self, cloud: &PointCloud, params: &ClusterParams) -> Vec<Cluster> {
        let n = cloud.len();
        let mut clusters = Vec::new();
        if n == 0 {
            return clusters;
        }

        let radius = params.distance_threshold;
        let radius_sq = radius * radius;
        self.hash.set_cell_size(radius);
        self.hash.build(cloud);

        self.labels.clear();
        self.labels.resize(n, UNVISITED);

        let mut id: u32 = 0;
        let mut rejected = 0usize;
        for seed in 0..n {
            if self.labels[seed] != UNVISITED {
                continue;
            }

            // BFS expansion using index cursor to avoid borrow conflicts
            self.labels[seed] = id;
            self.queue.clear();
            self.queue.push(seed);
            let mut qi = 0;
            while qi < self.queue.len() {
                let pt = self.queue[qi];
                qi += 1;

                self.hash
                    .query_neighbors(cloud, pt, radius_sq, &mut self.neighbors);
                for &ni in &self.neighbors {
                    if self.labels[ni] == UNVISITED {
                        self.labels[ni] = id;
                        self.queue.push(ni);
                    }
                }
            }
            id += 1;

            let size = self.queue.len();
            if size < params.min_size || size > params.max_size {
                rejected += 1;
                continue;
            }
            let mut indices = self.queue.clone();
            indices.sort_unstable();
            clusters.push(Cluster { indices });
        }

        debug!(
            components = id,
            kept = clusters.len(),
            rejected,
            "cluster extraction complete"
        );
        clusters
    }
}

/// One-shot cluster extraction with fresh buffers.
pub fn extract_clusters(cloud: &PointCloud, params: &ClusterParams) -> Vec<Cluster> {
    ClusterExtractor::new().extract(cloud, params)
}

// ── Section 3: Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::needless_range_loop)]
mod tests {
    use super::*;
    use crate::lidar::Point3;

    fn params(threshold: f32, min_size: usize, max_size: usize) -> ClusterParams {
        ClusterParams {
            distance_threshold: threshold,
            min_size,
            max_size,
        }
    }

    fn cloud_of(points: &[[f32; 3]]) -> PointCloud {
        points.iter().copied().map(Point3::from).collect()
    }

    #[test]
    fn test_two_groups() {
        // Group A near (1,0,0), group B near (5,0,0), lone point far away
        let cloud = cloud_of(&[
            [1.0, 0.0, 0.0],
            [1.05, 0.05, 0.0],
            [1.1, 0.0, 0.05],
            [5.0, 0.0, 0.0],
            [5.05, 0.05, 0.0],
            [5.1, 0.0, 0.05],
            [20.0, 20.0, 0.0],
        ]);
        let clusters = extract_clusters(&cloud, &params(0.2, 2, 100));

        assert_eq!(clusters.len(), 2, "lone point should not form a cluster");
        assert_eq!(clusters[0].indices, vec![0, 1, 2]);
        assert_eq!(clusters[1].indices, vec![3, 4, 5]);
    }

    #[test]
    fn test_transitive_chain_merges() {
        // Consecutive points 0.15 apart: ends are 1.35 apart but connected
        let cloud: PointCloud = (0..10).map(|i| Point3::new(i as f32 * 0.15, 0.0, 0.0)).collect();
        let clusters = extract_clusters(&cloud, &params(0.2, 1, 100));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 10);
    }

    #[test]
    fn test_small_group_rejected() {
        // Three mutually close points, min_size = 5
        let cloud = cloud_of(&[[2.0, 3.0, 1.0], [2.01, 3.01, 1.0], [2.02, 3.0, 1.01]]);
        let clusters = extract_clusters(&cloud, &params(0.1, 5, 100));
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_large_group_rejected() {
        let cloud: PointCloud = (0..50).map(|i| Point3::new(i as f32 * 0.05, 0.0, 0.0)).collect();
        assert!(extract_clusters(&cloud, &params(0.1, 1, 49)).is_empty());
        assert_eq!(extract_clusters(&cloud, &params(0.1, 1, 50)).len(), 1);
    }

    #[test]
    fn test_cluster_sizes_within_bounds() {
        let mut cloud = PointCloud::empty();
        // Groups of size 1..=12 spaced 10m apart
        for g in 0..12 {
            for k in 0..=g {
                cloud.push(Point3::new(g as f32 * 10.0, k as f32 * 0.1, 0.0));
            }
        }
        let clusters = extract_clusters(&cloud, &params(0.15, 4, 8));
        assert_eq!(clusters.len(), 5);
        for c in &clusters {
            assert!((4..=8).contains(&c.len()), "cluster size {} out of bounds", c.len());
        }
    }

    #[test]
    fn test_negative_coordinates_cross_voxel_boundary() {
        let cloud = cloud_of(&[[-0.05, -0.05, -0.05], [0.05, 0.05, 0.05], [-0.1, 0.0, 0.0]]);
        let clusters = extract_clusters(&cloud, &params(0.2, 1, 10));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_deterministic_and_reusable() {
        let mut cloud = PointCloud::empty();
        for i in 0..200 {
            let t = i as f32;
            cloud.push(Point3::new(
                (t * 0.13).sin() * 5.0,
                (t * 0.29).cos() * 5.0,
                (t * 0.07).sin(),
            ));
        }
        let p = params(0.8, 1, 1000);
        let fresh = extract_clusters(&cloud, &p);

        let mut extractor = ClusterExtractor::new();
        // Warm up on an unrelated cloud first
        let other: PointCloud = (0..30).map(|i| Point3::new(i as f32, 0.0, 0.0)).collect();
        let _ = extractor.extract(&other, &params(0.3, 1, 10));
        let reused = extractor.extract(&cloud, &p);

        assert_eq!(fresh, reused);
        let total: usize = fresh.iter().map(Cluster::len).sum();
        assert_eq!(total, 200, "min_size 1 keeps every point");
    }

    #[test]
    fn test_matches_brute_force_components() {
        let mut cloud = PointCloud::empty();
        for i in 0..120 {
            let t = i as f32;
            cloud.push(Point3::new((t * 1.7).sin() * 3.0, (t * 0.9).cos() * 3.0, (t * 0.3).sin() * 0.5));
        }
        let radius = 0.6f32;
        let clusters = extract_clusters(&cloud, &params(radius, 1, 1000));

        // Union-find reference over all pairs
        let n = cloud.len();
        let mut parent: Vec<usize> = (0..n).collect();
        fn find(parent: &mut Vec<usize>, i: usize) -> usize {
            let mut r = i;
            while parent[r] != r {
                r = parent[r];
            }
            parent[i] = r;
            r
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (cloud.point(i), cloud.point(j));
                let d2 = (a.x - b.x).powi(2) + (a.y - b.y).powi(2) + (a.z - b.z).powi(2);
                if d2 <= radius * radius {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    parent[ri] = rj;
                }
            }
        }
        let mut label = vec![usize::MAX; n];
        for (ci, c) in clusters.iter().enumerate() {
            for &i in &c.indices {
                label[i] = ci;
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let same_ref = find(&mut parent, i) == find(&mut parent, j);
                assert_eq!(same_ref, label[i] == label[j], "points {i} and {j} grouping mismatch");
            }
        }
    }

    #[test]
    fn test_saturated_voxel_keys() {
        // Coordinates this far out floor to i32::MIN on every axis
        let far = cloud_of(&[[-5e9, -5e9, -5e9]]);
        let clusters = extract_clusters(&far, &params(0.6, 1, 10));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].indices, vec![0]);

        let mixed = cloud_of(&[
            [0.0, 0.0, 0.0],
            [-5e9, -5e9, -5e9],
            [0.1, 0.0, 0.0],
            [-5e9, -5e9, -5e9],
        ]);
        let mut extractor = ClusterExtractor::new();
        let clusters = extractor.extract(&mixed, &params(0.6, 1, 10));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].indices, vec![0, 2]);
        assert_eq!(clusters[1].indices, vec![1, 3]);

        // No stale bucket state leaks into the next frame
        let near = cloud_of(&[[0.0, 0.0, 0.0], [0.1, 0.0, 0.0]]);
        let reused = extractor.extract(&near, &params(0.6, 1, 10));
        assert_eq!(reused, extract_clusters(&near, &params(0.6, 1, 10)));
    }

    #[test]
    fn test_empty_cloud() {
        assert!(extract_clusters(&PointCloud::empty(), &params(0.5, 1, 10)).is_empty());
    }
}
