// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

use edgefirst_obstacle_detector::{
    config::{Aabb, BoxFitMode, ClusterParams, Config, FilterParams, GroundParams, TrackingParams},
    lidar::{Error, Point3},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// PCD files, processed in order as consecutive frames.
    #[arg(env, required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// JSON configuration snapshot. When given, the detector parameters
    /// below are ignored and fields missing from the file take defaults.
    #[arg(long, env)]
    pub config: Option<PathBuf>,

    /// Voxel grid cell size in meters.
    #[arg(long, env, default_value = "0.2")]
    pub voxel_size: f32,

    /// Region of interest lower corner in meters.
    #[arg(long, env, num_args = 3, value_names = ["X", "Y", "Z"], value_delimiter = ' ',
          default_value = "-50 -6 -2", allow_negative_numbers = true)]
    pub roi_min: Vec<f32>,

    /// Region of interest upper corner in meters.
    #[arg(long, env, num_args = 3, value_names = ["X", "Y", "Z"], value_delimiter = ' ',
          default_value = "120 6 5", allow_negative_numbers = true)]
    pub roi_max: Vec<f32>,

    /// Ego vehicle exclusion box lower corner in meters.
    #[arg(long, env, num_args = 3, value_names = ["X", "Y", "Z"], value_delimiter = ' ',
          default_value = "-1.5 -1.7 -1.0", allow_negative_numbers = true)]
    pub ego_min: Vec<f32>,

    /// Ego vehicle exclusion box upper corner in meters.
    #[arg(long, env, num_args = 3, value_names = ["X", "Y", "Z"], value_delimiter = ' ',
          default_value = "2.6 1.7 -0.4", allow_negative_numbers = true)]
    pub ego_max: Vec<f32>,

    /// Keep points inside the ego box.
    #[arg(long, env)]
    pub no_ego_box: bool,

    /// Maximum distance of a ground inlier from the plane, in meters.
    #[arg(long, env, default_value = "0.3")]
    pub ground_threshold: f32,

    /// Number of RANSAC plane hypotheses.
    #[arg(long, env, default_value = "30")]
    pub ransac_iterations: usize,

    /// RANSAC sampling seed.
    #[arg(long, env, default_value = "24301")]
    pub seed: u64,

    /// Refine the ground plane over its inliers.
    #[arg(long, env, default_value = "true", action = ArgAction::Set)]
    pub refine_plane: bool,

    /// Points closer than this are clustered together, in meters.
    #[arg(long, env, default_value = "0.6")]
    pub cluster_threshold: f32,

    /// Smallest cluster reported.
    #[arg(long, env, default_value = "10")]
    pub cluster_min_size: usize,

    /// Largest cluster reported.
    #[arg(long, env, default_value = "5000")]
    pub cluster_max_size: usize,

    /// Fit yaw-oriented boxes instead of axis-aligned ones.
    #[arg(long, env)]
    pub pca_box: bool,

    /// Carry box identities across frames.
    #[arg(long, env, default_value = "true", action = ArgAction::Set)]
    pub tracking: bool,

    /// Largest center displacement between frames for a track match, in
    /// meters.
    #[arg(long, env, default_value = "1.0")]
    pub displacement_threshold: f32,

    /// Smallest footprint IoU for a track match.
    #[arg(long, env, default_value = "0.3")]
    pub iou_threshold: f32,

    /// Frames read ahead of the detector.
    #[arg(long, env, default_value = "2")]
    pub queue_depth: usize,

    /// Print the per-frame diagnostics with each frame.
    #[arg(long, env)]
    pub diagnostics: bool,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// Enable Tracy profiler broadcast
    #[arg(long, env)]
    pub tracy: bool,
}

fn corner(name: &str, v: &[f32]) -> Result<Point3, Error> {
    match v {
        [x, y, z] => Ok(Point3::new(*x, *y, *z)),
        _ => Err(Error::InvalidConfig(format!(
            "{name} expects 3 values, got {}",
            v.len()
        ))),
    }
}

impl TryFrom<&Args> for Config {
    type Error = Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        if let Some(path) = &args.config {
            return Config::from_json_file(path);
        }

        let ego_box = if args.no_ego_box {
            None
        } else {
            Some(Aabb::new(
                corner("--ego-min", &args.ego_min)?,
                corner("--ego-max", &args.ego_max)?,
            ))
        };

        Ok(Config {
            filter: FilterParams {
                voxel_size: args.voxel_size,
                roi: Aabb::new(
                    corner("--roi-min", &args.roi_min)?,
                    corner("--roi-max", &args.roi_max)?,
                ),
                ego_box,
            },
            ground: GroundParams {
                distance_threshold: args.ground_threshold,
                max_iterations: args.ransac_iterations,
                seed: args.seed,
                refine: args.refine_plane,
            },
            cluster: ClusterParams {
                distance_threshold: args.cluster_threshold,
                min_size: args.cluster_min_size,
                max_size: args.cluster_max_size,
            },
            box_fit: if args.pca_box {
                BoxFitMode::Oriented
            } else {
                BoxFitMode::AxisAligned
            },
            tracking: TrackingParams {
                enabled: args.tracking,
                displacement_threshold: args.displacement_threshold,
                iou_threshold: args.iou_threshold,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args_match_default_config() {
        let args = Args::try_parse_from(["obstacle-detector", "frame.pcd"]).unwrap();
        let config = Config::try_from(&args).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "obstacle-detector",
            "--roi-min",
            "-10",
            "-5",
            "-1",
            "--pca-box",
            "--tracking",
            "false",
            "--no-ego-box",
            "a.pcd",
            "b.pcd",
        ])
        .unwrap();
        assert_eq!(args.files.len(), 2);
        let config = Config::try_from(&args).unwrap();
        assert_eq!(config.filter.roi.min, Point3::new(-10.0, -5.0, -1.0));
        assert_eq!(config.box_fit, BoxFitMode::Oriented);
        assert!(!config.tracking.enabled);
        assert!(config.filter.ego_box.is_none());
    }

    #[test]
    fn test_help_text_spacing() {
        use clap::CommandFactory;
        let cmd = Args::command();
        for arg in cmd.get_arguments() {
            for help in [arg.get_help(), arg.get_long_help()].into_iter().flatten() {
                let text = help.to_string();
                assert!(!text.contains("  "), "{}: {text:?}", arg.get_id());
            }
        }
    }
}
