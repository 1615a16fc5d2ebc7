// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point density and scope reduction.
//!
//! 1. **Voxel grid**: Space is divided into cubic cells of `voxel_size`.
//!    All points of a cell are replaced by their centroid. Cells are emitted
//!    in the order their first point appears in the input.
//! 2. **ROI crop**: Points outside the region of interest are dropped.
//! 3. **Ego removal**: Points inside the vehicle's own body box are dropped.
//!
//! Non-finite points are discarded before binning.

use crate::{
    config::{Aabb, FilterParams},
    lidar::{Point3, PointCloud},
};
use std::collections::HashMap;
use tracing::instrument;

/// Run the full filter chain: downsample, crop to ROI, remove ego points.
#[instrument(skip_all, fields(n_in = cloud.len()))]
pub fn filter_cloud(cloud: &PointCloud, params: &FilterParams) -> PointCloud {
    let downsampled = voxel_downsample(cloud, params.voxel_size);
    let cropped = crop(&downsampled, &params.roi);
    match &params.ego_box {
        Some(ego) => remove_box(&cropped, ego),
        None => cropped,
    }
}

/// Keep only the points inside `roi`.
pub fn crop(cloud: &PointCloud, roi: &Aabb) -> PointCloud {
    cloud.iter().filter(|p| roi.contains(*p)).collect()
}

/// Drop the points inside `exclusion`.
pub fn remove_box(cloud: &PointCloud, exclusion: &Aabb) -> PointCloud {
    cloud.iter().filter(|p| !exclusion.contains(*p)).collect()
}

/// Per-voxel running sum, accumulated in f64 so large cells stay exact
/// enough for the centroid to land back in its own cell.
#[derive(Clone, Copy, Default)]
struct VoxelSum {
    x: f64,
    y: f64,
    z: f64,
    count: u32,
}

/// Replace every occupied voxel by the centroid of its points.
///
/// `voxel_size` must be positive; [`crate::config::Config::validate`]
/// guarantees this for pipeline callers.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f32) -> PointCloud {
    debug_assert!(voxel_size > 0.0);
    let inv = 1.0 / voxel_size;

    let mut slots: HashMap<(i32, i32, i32), usize> = HashMap::with_capacity(cloud.len());
    let mut sums: Vec<VoxelSum> = Vec::new();

    for p in cloud.iter() {
        if !p.is_finite() {
            continue;
        }
        let key = voxel_key(p, inv);
        let slot = *slots.entry(key).or_insert_with(|| {
            sums.push(VoxelSum::default());
            sums.len() - 1
        });
        let s = &mut sums[slot];
        s.x += p.x as f64;
        s.y += p.y as f64;
        s.z += p.z as f64;
        s.count += 1;
    }

    sums.iter()
        .map(|s| {
            let n = s.count as f64;
            Point3::new((s.x / n) as f32, (s.y / n) as f32, (s.z / n) as f32)
        })
        .collect()
}

#[inline]
fn voxel_key(p: Point3, inv_cell_size: f32) -> (i32, i32, i32) {
    (
        (p.x * inv_cell_size).floor() as i32,
        (p.y * inv_cell_size).floor() as i32,
        (p.z * inv_cell_size).floor() as i32,
    )
}
