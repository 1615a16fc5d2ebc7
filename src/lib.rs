// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst LiDAR Obstacle Detector Library
//!
//! Turns one LiDAR point cloud per frame into a list of 3D bounding boxes
//! with identities that persist across frames.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐   ┌───────────┐
//! │  filter    │──►│  ground    │──►│  cluster   │──►│  bbox    │──►│  tracker  │
//! │ voxel/ROI  │   │  RANSAC    │   │ spatial    │   │ AABB or  │   │ greedy    │
//! │ ego crop   │   │  plane     │   │ hash BFS   │   │ PCA yaw  │   │ IoU match │
//! └────────────┘   └────────────┘   └────────────┘   └──────────┘   └───────────┘
//!                                                                        ▲  │
//!                                                        TrackerState ───┘  ▼
//! ```
//!
//! Every stage except the tracker is a pure function of its input and the
//! immutable [`Config`]. The tracker reads the previous frame's
//! [`TrackerState`] and the pipeline returns the next one; the caller owns
//! it and threads it into the following frame.
//!
//! # Modules
//!
//! - [`lidar`]: Point cloud types and the crate error
//! - [`config`]: Configuration snapshot and validation
//! - [`filter`]: Voxel downsampling, ROI crop and ego removal
//! - [`ground`]: RANSAC ground plane segmentation
//! - [`cluster`]: Euclidean clustering over a flat spatial hash
//! - [`bbox`]: Axis-aligned and oriented box fitting
//! - [`tracker`]: Frame-to-frame identity association
//! - [`pipeline`]: The [`Detector`] tying the stages together
//! - [`pcd`]: PCD file reader for recorded frames
//!
//! # Example
//!
//! ```no_run
//! use edgefirst_obstacle_detector::{Config, Detector, TrackerState, pcd};
//!
//! let mut detector = Detector::new(Config::default())?;
//! let mut state = TrackerState::new();
//! for path in ["frame0.pcd", "frame1.pcd"] {
//!     let cloud = pcd::read_pcd_file(path)?;
//!     let frame = detector.process(&cloud, &state)?;
//!     for b in &frame.boxes {
//!         println!("{} at {:?}", b.id, b.position);
//!     }
//!     state = frame.state;
//! }
//! # Ok::<(), edgefirst_obstacle_detector::lidar::Error>(())
//! ```

pub mod bbox;
pub mod cluster;
pub mod config;
pub mod filter;
pub mod ground;
pub mod lidar;
pub mod pcd;
pub mod pipeline;
pub mod tracker;

pub use bbox::{BoundingBox, Quaternion};
pub use config::{BoxFitMode, Config};
pub use lidar::{Error, Point3, PointCloud};
pub use pipeline::{Detector, Frame, FrameDiagnostics};
pub use tracker::TrackerState;
