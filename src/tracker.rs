// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame-to-frame box identity propagation.
//!
//! A previous box and a current box are a candidate pair when their centers
//! moved less than the displacement threshold and their ground footprints
//! overlap with at least the IoU threshold. Candidates are ranked by IoU
//! (descending), displacement (ascending) and finally by (previous index,
//! current index), then assigned greedily one-to-one. Matched current boxes
//! inherit the previous id; everything else keeps the id it was minted with.

use crate::{bbox::BoundingBox, config::TrackingParams};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Cross-frame state owned by the caller and threaded through each frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Boxes of the previous frame, ids as published.
    pub boxes: Vec<BoundingBox>,
    /// Next identity to mint. Wraps to 0 after `u64::MAX`.
    pub next_id: u64,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids for `count` fresh boxes, starting at `next_id`.
    pub fn fresh_ids(&self, count: usize) -> impl Iterator<Item = u64> {
        let first = self.next_id;
        (0..count as u64).map(move |i| first.wrapping_add(i))
    }

    /// The state that follows this one after `boxes` were published, having
    /// minted `minted` new ids.
    pub fn advance(&self, boxes: Vec<BoundingBox>, minted: usize) -> TrackerState {
        TrackerState {
            boxes,
            next_id: self.next_id.wrapping_add(minted as u64),
        }
    }
}

/// A candidate (previous, current) association.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Association {
    pub previous: usize,
    pub current: usize,
    pub iou: f32,
    pub displacement: f32,
}

/// Rewrite the ids of `current` from the matching boxes of `previous`.
#[instrument(skip_all, fields(n_prev = previous.boxes.len(), n_curr = current.len()))]
pub fn track(
    previous: &TrackerState,
    mut current: Vec<BoundingBox>,
    params: &TrackingParams,
) -> Vec<BoundingBox> {
    let matches = associate(&previous.boxes, &current, params);
    for m in &matches {
        current[m.current].id = previous.boxes[m.previous].id;
    }
    debug!(matched = matches.len(), "tracking");
    current
}

/// Greedy one-to-one matching of `previous` against `current`.
///
/// The returned associations are in assignment order.
pub fn associate(
    previous: &[BoundingBox],
    current: &[BoundingBox],
    params: &TrackingParams,
) -> Vec<Association> {
    let mut candidates = Vec::new();
    for (i, prev) in previous.iter().enumerate() {
        for (j, curr) in current.iter().enumerate() {
            let displacement = prev.position.distance(&curr.position);
            if displacement.is_nan() || displacement >= params.displacement_threshold {
                continue;
            }
            let iou = footprint_iou(prev, curr);
            if iou >= params.iou_threshold {
                candidates.push(Association {
                    previous: i,
                    current: j,
                    iou,
                    displacement,
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.iou
            .total_cmp(&a.iou)
            .then(a.displacement.total_cmp(&b.displacement))
            .then(a.previous.cmp(&b.previous))
            .then(a.current.cmp(&b.current))
    });

    let mut prev_taken = vec![false; previous.len()];
    let mut curr_taken = vec![false; current.len()];
    let mut matches = Vec::with_capacity(previous.len().min(current.len()));
    for c in candidates {
        if prev_taken[c.previous] || curr_taken[c.current] {
            continue;
        }
        prev_taken[c.previous] = true;
        curr_taken[c.current] = true;
        matches.push(c);
    }
    matches
}

// ── Footprint overlap ───────────────────────────────────────────────

/// Intersection-over-union of the ground-plane footprints of two boxes.
///
/// Footprints are yaw-rotated rectangles; the intersection is computed by
/// clipping one against the other. Returns 0 when the union is empty.
pub fn footprint_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let pa = to_f64(a.footprint());
    let pb = to_f64(b.footprint());
    let area_a = polygon_area(&pa);
    let area_b = polygon_area(&pb);
    let inter = polygon_area(&clip_convex(&pa, &pb));
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    (inter / union).clamp(0.0, 1.0) as f32
}

fn to_f64(corners: [[f32; 2]; 4]) -> Vec<[f64; 2]> {
    corners
        .iter()
        .map(|c| [c[0] as f64, c[1] as f64])
        .collect()
}

/// Sutherland–Hodgman: clip `subject` by the convex counter-clockwise
/// polygon `clip`.
fn clip_convex(subject: &[[f64; 2]], clip: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut output = subject.to_vec();
    for k in 0..clip.len() {
        if output.is_empty() {
            break;
        }
        let c1 = clip[k];
        let c2 = clip[(k + 1) % clip.len()];
        let side = |p: [f64; 2]| (c2[0] - c1[0]) * (p[1] - c1[1]) - (c2[1] - c1[1]) * (p[0] - c1[0]);

        let input = std::mem::take(&mut output);
        let mut s = input[input.len() - 1];
        for &e in &input {
            let ss = side(s);
            let se = side(e);
            if se >= 0.0 {
                if ss < 0.0 {
                    output.push(lerp(s, e, ss / (ss - se)));
                }
                output.push(e);
            } else if ss >= 0.0 {
                output.push(lerp(s, e, ss / (ss - se)));
            }
            s = e;
        }
    }
    output
}

#[inline]
fn lerp(a: [f64; 2], b: [f64; 2], t: f64) -> [f64; 2] {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]
}

/// Unsigned shoelace area.
fn polygon_area(poly: &[[f64; 2]]) -> f64 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..poly.len() {
        let p = poly[i];
        let q = poly[(i + 1) % poly.len()];
        twice += p[0] * q[1] - q[0] * p[1];
    }
    0.5 * twice.abs()
}
