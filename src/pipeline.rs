// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-frame orchestration of the detection stages.
//!
//! ```text
//! raw cloud ─► filter ─► ground ─► cluster ─► bbox ─► tracker ─► Frame
//!                           │                            ▲
//!                           └─ ground / obstacle         └─ TrackerState
//! ```
//!
//! The [`Detector`] holds the active [`Config`] and the clustering scratch
//! buffers. Cross-frame state is owned by the caller: every call to
//! [`Detector::process`] reads a [`TrackerState`] and returns the next one in
//! [`Frame::state`]. The input state is never modified, so a caller that
//! drops a frame keeps its previous state intact.

use crate::{
    bbox::{BoundingBox, fit_box},
    cluster::{Cluster, ClusterExtractor},
    config::Config,
    filter::filter_cloud,
    ground::{Plane, segment_ground},
    lidar::{Error, PointCloud},
    tracker::{TrackerState, track},
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info_span, instrument};

/// Point and object counts for one frame, plus non-fatal conditions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrameDiagnostics {
    pub input_points: usize,
    pub filtered_points: usize,
    pub ground_points: usize,
    pub obstacle_points: usize,
    pub clusters: usize,
    /// No ground plane could be estimated; every point went to obstacles.
    pub degraded_segmentation: bool,
    /// Oriented fits that fell back to axis-aligned boxes.
    pub degenerate_fits: usize,
}

/// Result of processing one point cloud.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    /// Detected boxes in cluster order.
    pub boxes: Vec<BoundingBox>,
    pub ground: PointCloud,
    pub obstacle: PointCloud,
    pub plane: Option<Plane>,
    /// Clusters as indices into [`Frame::obstacle`].
    pub clusters: Vec<Cluster>,
    pub diagnostics: FrameDiagnostics,
    /// State to pass to the next call of [`Detector::process`].
    pub state: TrackerState,
}

/// Obstacle detection pipeline.
pub struct Detector {
    config: Config,
    extractor: ClusterExtractor,
}

impl Detector {
    /// Create a detector, rejecting an invalid configuration.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            extractor: ClusterExtractor::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the whole configuration between frames.
    ///
    /// On error the current configuration stays in force.
    pub fn reconfigure(&mut self, config: Config) -> Result<(), Error> {
        config.validate()?;
        debug!(?config, "reconfigured");
        self.config = config;
        Ok(())
    }

    /// Run filter, segmentation, clustering, box fitting and tracking on
    /// one cloud.
    ///
    /// Every stage is infallible once the configuration has passed
    /// validation, so this currently always returns `Ok`. Per-frame trouble
    /// is reported through [`FrameDiagnostics`] instead. The `Result` is the
    /// frame-level failure contract: an `Err` would leave `state` untouched
    /// and the caller would retry with it on the next frame.
    #[instrument(skip_all, fields(n = cloud.len()))]
    pub fn process(&mut self, cloud: &PointCloud, state: &TrackerState) -> Result<Frame, Error> {
        let config = &self.config;
        let mut diagnostics = FrameDiagnostics {
            input_points: cloud.len(),
            ..Default::default()
        };

        let filtered = filter_cloud(cloud, &config.filter);
        diagnostics.filtered_points = filtered.len();
        if filtered.is_empty() {
            return Ok(Frame {
                diagnostics,
                state: state.advance(Vec::new(), 0),
                ..Default::default()
            });
        }

        let segmentation = segment_ground(&filtered, &config.ground);
        diagnostics.ground_points = segmentation.ground.len();
        diagnostics.obstacle_points = segmentation.obstacle.len();
        diagnostics.degraded_segmentation = segmentation.degraded;

        let clusters = self
            .extractor
            .extract(&segmentation.obstacle, &config.cluster);
        diagnostics.clusters = clusters.len();

        let ids: Vec<u64> = state.fresh_ids(clusters.len()).collect();
        let fits: Vec<_> = {
            let _span = info_span!("fit_boxes", n = clusters.len()).entered();
            clusters
                .par_iter()
                .zip(ids.par_iter())
                .map(|(cluster, &id)| {
                    let points = segmentation.obstacle.select(&cluster.indices);
                    fit_box(&points, id, config.box_fit)
                })
                .collect()
        };
        diagnostics.degenerate_fits = fits.iter().filter(|f| f.degenerate).count();
        let mut boxes: Vec<BoundingBox> = fits.into_iter().map(|f| f.bbox).collect();

        if config.tracking.enabled {
            boxes = track(state, boxes, &config.tracking);
        }

        let next = state.advance(boxes.clone(), ids.len());
        Ok(Frame {
            boxes,
            ground: segmentation.ground,
            obstacle: segmentation.obstacle,
            plane: segmentation.plane,
            clusters,
            diagnostics,
            state: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BoxFitMode, Config},
        lidar::Point3,
    };

    /// Flat ground grid at z=-1 with a 1m³ block of points standing on it.
    fn scene(block_x: f32) -> PointCloud {
        let mut cloud = PointCloud::empty();
        for i in 0..60 {
            for j in 0..30 {
                cloud.push(Point3::new(
                    5.0 + i as f32 * 0.5,
                    -4.0 + j as f32 * 0.25,
                    -1.0,
                ));
            }
        }
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..5 {
                    cloud.push(Point3::new(
                        block_x + i as f32 * 0.25,
                        j as f32 * 0.25,
                        -0.5 + k as f32 * 0.25,
                    ));
                }
            }
        }
        cloud
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.filter.voxel_size = 0.1;
        config.cluster.min_size = 5;
        config
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut bad = Config::default();
        bad.filter.voxel_size = -1.0;
        assert!(matches!(Detector::new(bad), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_reconfigure_keeps_old_on_error() {
        let mut detector = Detector::new(config()).unwrap();
        let mut bad = config();
        bad.cluster.max_size = 1;
        assert!(detector.reconfigure(bad).is_err());
        assert_eq!(detector.config(), &config());

        let mut good = config();
        good.box_fit = BoxFitMode::Oriented;
        detector.reconfigure(good).unwrap();
        assert_eq!(detector.config().box_fit, BoxFitMode::Oriented);
    }

    #[test]
    fn test_empty_cloud() {
        let mut detector = Detector::new(config()).unwrap();
        let state = TrackerState {
            boxes: Vec::new(),
            next_id: 42,
        };
        let frame = detector.process(&PointCloud::empty(), &state).unwrap();
        assert!(frame.boxes.is_empty());
        assert!(frame.ground.is_empty() && frame.obstacle.is_empty());
        assert!(!frame.diagnostics.degraded_segmentation);
        assert_eq!(frame.state.next_id, 42);
    }

    #[test]
    fn test_detects_block_on_ground() {
        let mut detector = Detector::new(config()).unwrap();
        let frame = detector.process(&scene(10.0), &TrackerState::new()).unwrap();
        let d = frame.diagnostics;

        assert_eq!(d.ground_points + d.obstacle_points, d.filtered_points);
        assert_eq!(frame.boxes.len(), 1, "diagnostics: {d:?}");
        let b = frame.boxes[0];
        assert!((b.position.x - 10.5).abs() < 0.1, "x = {}", b.position.x);
        assert!((b.position.y - 0.5).abs() < 0.1, "y = {}", b.position.y);
        assert!(b.dimension.iter().all(|&v| v > 0.0));
        assert_eq!(frame.state.boxes, frame.boxes);
        assert_eq!(frame.state.next_id, 1);
    }

    #[test]
    fn test_identity_carries_across_frames() {
        let mut detector = Detector::new(config()).unwrap();
        let first = detector.process(&scene(10.0), &TrackerState::new()).unwrap();
        let second = detector.process(&scene(10.2), &first.state).unwrap();
        assert_eq!(second.boxes.len(), 1);
        assert_eq!(second.boxes[0].id, first.boxes[0].id);
        assert_eq!(second.state.next_id, 2);

        // Far jump: fresh identity
        let third = detector.process(&scene(25.0), &second.state).unwrap();
        assert_eq!(third.boxes[0].id, 2);
    }

    #[test]
    fn test_tracking_disabled_mints_fresh_ids() {
        let mut cfg = config();
        cfg.tracking.enabled = false;
        let mut detector = Detector::new(cfg).unwrap();
        let first = detector.process(&scene(10.0), &TrackerState::new()).unwrap();
        let second = detector.process(&scene(10.0), &first.state).unwrap();
        assert_eq!(first.boxes[0].id, 0);
        assert_eq!(second.boxes[0].id, 1);
        assert_eq!(second.state.boxes, second.boxes);
    }

    #[test]
    fn test_input_state_untouched() {
        let mut detector = Detector::new(config()).unwrap();
        let state = TrackerState::new();
        let snapshot = state.clone();
        let _ = detector.process(&scene(10.0), &state).unwrap();
        assert_eq!(state, snapshot);
    }
}
