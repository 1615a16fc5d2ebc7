// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! RANSAC ground plane segmentation for LiDAR point clouds.
//!
//! 1. **Hypothesize**: Each iteration draws 3 distinct points from a seeded
//!    RNG, rejects collinear triples, and builds the plane through them.
//!
//! 2. **Score**: Points within `distance_threshold` of the plane are
//!    inliers. The hypothesis with the most inliers wins; the earliest one
//!    wins a tie, so the result depends only on the seed.
//!
//! 3. **Refine**: Optionally, the winning plane is re-fitted to its inliers
//!    by PCA (smallest-eigenvalue eigenvector of the inlier covariance). The
//!    refined plane replaces the sampled one only if it keeps at least as many
//!    inliers.
//!
//! 4. **Partition**: Inliers become ground, everything else obstacle. Both
//!    sets keep input order and together contain every input point once.

use crate::{
    config::GroundParams,
    lidar::{Point3, PointCloud},
};
use rand::{SeedableRng, rngs::StdRng, seq::index};
use rayon::prelude::*;
use tracing::{debug, instrument, warn};

/// Minimum points needed to hypothesize a plane.
const MIN_POINTS: usize = 3;
/// Sine of the smallest angle accepted between two sample edges.
const COLLINEAR_SIN: f64 = 1e-6;
/// Below this many points, inlier counting stays on the calling thread.
const PARALLEL_MIN_POINTS: usize = 4096;

/// Plane in Hessian normal form: `normal · p + d = 0`, `|normal| = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: [f32; 3],
    pub d: f32,
}

impl Plane {
    /// Plane through three points, or `None` if they are (nearly) collinear.
    pub fn from_points(a: Point3, b: Point3, c: Point3) -> Option<Self> {
        let ab = [
            (b.x - a.x) as f64,
            (b.y - a.y) as f64,
            (b.z - a.z) as f64,
        ];
        let ac = [
            (c.x - a.x) as f64,
            (c.y - a.y) as f64,
            (c.z - a.z) as f64,
        ];
        let n = [
            ab[1] * ac[2] - ab[2] * ac[1],
            ab[2] * ac[0] - ab[0] * ac[2],
            ab[0] * ac[1] - ab[1] * ac[0],
        ];
        let n_mag = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        let ab_mag = (ab[0] * ab[0] + ab[1] * ab[1] + ab[2] * ab[2]).sqrt();
        let ac_mag = (ac[0] * ac[0] + ac[1] * ac[1] + ac[2] * ac[2]).sqrt();
        if n_mag <= 0.0 || n_mag <= COLLINEAR_SIN * ab_mag * ac_mag {
            return None;
        }
        let inv = 1.0 / n_mag;
        let normal = [n[0] * inv, n[1] * inv, n[2] * inv];
        let d = -(normal[0] * a.x as f64 + normal[1] * a.y as f64 + normal[2] * a.z as f64);
        Some(Self {
            normal: [normal[0] as f32, normal[1] as f32, normal[2] as f32],
            d: d as f32,
        })
    }

    /// Unsigned point-to-plane distance.
    #[inline]
    pub fn distance(&self, p: Point3) -> f32 {
        (self.normal[0] * p.x + self.normal[1] * p.y + self.normal[2] * p.z + self.d).abs()
    }
}

/// Ground/obstacle partition of one cloud.
#[derive(Clone, Debug, Default)]
pub struct Segmentation {
    pub ground: PointCloud,
    pub obstacle: PointCloud,
    /// The plane the partition was made with, if one was found.
    pub plane: Option<Plane>,
    /// True when no plane could be estimated and every point was classified
    /// as obstacle.
    pub degraded: bool,
}

impl Segmentation {
    fn degraded(cloud: &PointCloud) -> Self {
        Self {
            ground: PointCloud::empty(),
            obstacle: cloud.clone(),
            plane: None,
            degraded: true,
        }
    }
}

/// Split `cloud` into ground and obstacle points.
///
/// Fully deterministic for a given `params.seed`. Fewer than 3 points, or a
/// cloud whose samples are all collinear, yields a degraded segmentation.
#[instrument(skip_all, fields(n = cloud.len()))]
pub fn segment_ground(cloud: &PointCloud, params: &GroundParams) -> Segmentation {
    let n = cloud.len();
    if n < MIN_POINTS {
        if n > 0 {
            warn!(n, "too few points for plane fitting, all points kept as obstacles");
        }
        return Segmentation::degraded(cloud);
    }

    let threshold = params.distance_threshold;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Plane, usize)> = None;

    for _ in 0..params.max_iterations {
        let sample = index::sample(&mut rng, n, MIN_POINTS);
        let plane = match Plane::from_points(
            cloud.point(sample.index(0)),
            cloud.point(sample.index(1)),
            cloud.point(sample.index(2)),
        ) {
            Some(p) => p,
            None => continue,
        };
        let inliers = count_inliers(cloud, &plane, threshold);
        if best.is_none_or(|(_, count)| inliers > count) {
            best = Some((plane, inliers));
            if inliers == n {
                break;
            }
        }
    }

    let Some((mut plane, mut inliers)) = best else {
        warn!(n, "no non-collinear sample found, all points kept as obstacles");
        return Segmentation::degraded(cloud);
    };

    if params.refine {
        if let Some(refined) = refine_plane(cloud, &plane, threshold) {
            let refined_inliers = count_inliers(cloud, &refined, threshold);
            if refined_inliers >= inliers {
                plane = refined;
                inliers = refined_inliers;
            }
        }
    }
    debug!(inliers, n, ?plane, "ground plane selected");

    let mut ground = PointCloud::with_capacity(inliers);
    let mut obstacle = PointCloud::with_capacity(n - inliers);
    for p in cloud.iter() {
        if plane.distance(p) <= threshold {
            ground.push(p);
        } else {
            obstacle.push(p);
        }
    }

    Segmentation {
        ground,
        obstacle,
        plane: Some(plane),
        degraded: false,
    }
}

fn count_inliers(cloud: &PointCloud, plane: &Plane, threshold: f32) -> usize {
    let n = cloud.len();
    if n < PARALLEL_MIN_POINTS {
        cloud.iter().filter(|p| plane.distance(*p) <= threshold).count()
    } else {
        (0..n)
            .into_par_iter()
            .filter(|&i| plane.distance(cloud.point(i)) <= threshold)
            .count()
    }
}

/// Least-squares plane through the inliers of `plane`.
fn refine_plane(cloud: &PointCloud, plane: &Plane, threshold: f32) -> Option<Plane> {
    let mut k = 0usize;
    let mut c = [0.0f64; 3];
    for p in cloud.iter().filter(|p| plane.distance(*p) <= threshold) {
        c[0] += p.x as f64;
        c[1] += p.y as f64;
        c[2] += p.z as f64;
        k += 1;
    }
    if k < MIN_POINTS {
        return None;
    }
    let inv_k = 1.0 / k as f64;
    for v in c.iter_mut() {
        *v *= inv_k;
    }

    let mut cov = [0.0f64; 6];
    for p in cloud.iter().filter(|p| plane.distance(*p) <= threshold) {
        let dx = p.x as f64 - c[0];
        let dy = p.y as f64 - c[1];
        let dz = p.z as f64 - c[2];
        cov[0] += dx * dx;
        cov[1] += dx * dy;
        cov[2] += dx * dz;
        cov[3] += dy * dy;
        cov[4] += dy * dz;
        cov[5] += dz * dz;
    }
    for v in cov.iter_mut() {
        *v *= inv_k;
    }

    let (eigenvalues, eigenvectors) = sym3x3_eigen(cov);
    let normal = eigenvectors[smallest_eigenvalue_index(eigenvalues)];
    let mag = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
    if mag.is_nan() || mag < 0.5 {
        return None;
    }
    let d = -(normal[0] * c[0] + normal[1] * c[1] + normal[2] * c[2]);
    Some(Plane {
        normal: [normal[0] as f32, normal[1] as f32, normal[2] as f32],
        d: d as f32,
    })
}

fn smallest_eigenvalue_index(eigenvalues: [f64; 3]) -> usize {
    if eigenvalues[0] <= eigenvalues[1] && eigenvalues[0] <= eigenvalues[2] {
        0
    } else if eigenvalues[1] <= eigenvalues[2] {
        1
    } else {
        2
    }
}

/// Eigendecomposition of a 3×3 symmetric matrix given as its upper triangle
/// `[a11, a12, a13, a22, a23, a33]`.
///
/// Uses the analytical method described by Smith (1961) / Kopp (2008).
fn sym3x3_eigen(mat: [f64; 6]) -> ([f64; 3], [[f64; 3]; 3]) {
    let [a11, a12, a13, a22, a23, a33] = mat;

    let q = (a11 + a22 + a33) / 3.0;
    let p1 = a12 * a12 + a13 * a13 + a23 * a23;

    let eigenvalues = if p1 < 1e-30 {
        let mut evs = [a11, a22, a33];
        evs.sort_unstable_by(|a, b| b.total_cmp(a));
        evs
    } else {
        let p2 = (a11 - q) * (a11 - q) + (a22 - q) * (a22 - q) + (a33 - q) * (a33 - q) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let inv_p = 1.0 / p;

        let b11 = (a11 - q) * inv_p;
        let b12 = a12 * inv_p;
        let b13 = a13 * inv_p;
        let b22 = (a22 - q) * inv_p;
        let b23 = a23 * inv_p;
        let b33 = (a33 - q) * inv_p;

        let half_det = (b11 * b22 * b33 + 2.0 * b12 * b13 * b23
            - b11 * b23 * b23
            - b22 * b13 * b13
            - b33 * b12 * b12)
            / 2.0;

        let phi = half_det.clamp(-1.0, 1.0).acos() / 3.0;

        let e1 = q + 2.0 * p * phi.cos();
        let e3 = q + 2.0 * p * (phi + std::f64::consts::TAU / 3.0).cos();
        let e2 = 3.0 * q - e1 - e3;
        [e1, e2, e3]
    };

    let eigenvectors = [
        eigenvector_for(mat, eigenvalues[0]),
        eigenvector_for(mat, eigenvalues[1]),
        eigenvector_for(mat, eigenvalues[2]),
    ];

    (eigenvalues, eigenvectors)
}

/// Eigenvector of a 3×3 symmetric matrix at a given eigenvalue, taken as the
/// largest cross product of two rows of `mat - lambda * I`.
fn eigenvector_for(mat: [f64; 6], lambda: f64) -> [f64; 3] {
    let m00 = mat[0] - lambda;
    let m01 = mat[1];
    let m02 = mat[2];
    let m11 = mat[3] - lambda;
    let m12 = mat[4];
    let m22 = mat[5] - lambda;

    let candidates = [
        [
            m01 * m12 - m02 * m11,
            m02 * m01 - m00 * m12,
            m00 * m11 - m01 * m01,
        ],
        [
            m01 * m22 - m02 * m12,
            m02 * m02 - m00 * m22,
            m00 * m12 - m01 * m02,
        ],
        [
            m11 * m22 - m12 * m12,
            m12 * m02 - m01 * m22,
            m01 * m12 - m11 * m02,
        ],
    ];

    let (v, mag) = candidates
        .iter()
        .map(|v| (*v, v[0] * v[0] + v[1] * v[1] + v[2] * v[2]))
        .fold(([0.0; 3], -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if mag < 1e-30 {
        return [0.0, 0.0, 1.0];
    }

    let inv = 1.0 / mag.sqrt();
    [v[0] * inv, v[1] * inv, v[2] * inv]
}
