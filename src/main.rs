// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_obstacle_detector::{
    BoundingBox, Config, Detector, FrameDiagnostics, PointCloud, TrackerState, lidar::Error, pcd,
};
use kanal::Receiver;
use serde::Serialize;
use std::{
    io::{BufWriter, Write as _},
    path::PathBuf,
    thread,
    time::Instant,
};
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// A frame loaded by the reader thread.
struct LoadedFrame {
    index: usize,
    path: PathBuf,
    cloud: Result<PointCloud, Error>,
}

/// One line of output.
#[derive(Serialize)]
struct FrameReport<'a> {
    frame: usize,
    file: &'a str,
    boxes: &'a [BoundingBox],
    ground_points: usize,
    obstacle_points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<&'a FrameDiagnostics>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args);

    let config = Config::try_from(&args)?;
    let mut detector = Detector::new(config)?;
    info!(config = ?detector.config(), "obstacle detector ready");

    let (tx, rx) = kanal::bounded(args.queue_depth.max(1));
    let files = args.files.clone();
    let reader = thread::Builder::new()
        .name("pcd_reader".to_string())
        .spawn(move || {
            for (index, path) in files.into_iter().enumerate() {
                let cloud = pcd::read_pcd_file(&path);
                if tx.send(LoadedFrame { index, path, cloud }).is_err() {
                    break;
                }
            }
        })?;

    let processed = detect_loop(&mut detector, rx, args.diagnostics)?;

    if reader.join().is_err() {
        error!("pcd reader thread panicked");
    }
    info!(frames = processed, "done");
    Ok(())
}

/// Process frames in arrival order until the reader hangs up. A frame that
/// fails to load is skipped and leaves the tracker state untouched.
fn detect_loop(
    detector: &mut Detector,
    rx: Receiver<LoadedFrame>,
    with_diagnostics: bool,
) -> Result<usize, Error> {
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut state = TrackerState::new();
    let mut processed = 0;

    while let Ok(loaded) = rx.recv() {
        let _span = info_span!("frame", index = loaded.index).entered();
        let cloud = match loaded.cloud {
            Ok(cloud) => cloud,
            Err(e) => {
                error!(path = %loaded.path.display(), "skipping frame: {}", e);
                continue;
            }
        };

        let start = Instant::now();
        let frame = detector.process(&cloud, &state)?;
        let elapsed = start.elapsed();

        if frame.diagnostics.degraded_segmentation {
            warn!(path = %loaded.path.display(), "no ground plane found");
        }
        info!(
            boxes = frame.boxes.len(),
            points = cloud.len(),
            elapsed_ms = elapsed.as_secs_f64() * 1e3,
            "frame processed"
        );

        let file = loaded.path.to_string_lossy();
        let report = FrameReport {
            frame: loaded.index,
            file: &file,
            boxes: &frame.boxes,
            ground_points: frame.ground.len(),
            obstacle_points: frame.obstacle.len(),
            diagnostics: with_diagnostics.then_some(&frame.diagnostics),
        };
        serde_json::to_writer(&mut out, &report)?;
        out.write_all(b"\n")?;
        out.flush()?;

        state = frame.state;
        processed += 1;
    }

    Ok(processed)
}

fn init_tracing(args: &Args) {
    // stdout carries the JSON frames, logs go to stderr
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(args.rust_log);
    let registry = tracing_subscriber::registry().with(fmt_layer);

    #[cfg(feature = "tracy")]
    let registry = registry.with(args.tracy.then(|| {
        tracing_tracy::TracyLayer::new(tracing_tracy::DefaultConfig::default())
    }));

    registry.init();

    #[cfg(not(feature = "tracy"))]
    if args.tracy {
        warn!("built without the tracy feature, --tracy ignored");
    }
}
