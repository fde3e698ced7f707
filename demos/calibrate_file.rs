//! Calibrate every formula model against a points file.
//!
//! Usage:
//!
//! ```text
//! cargo run --example calibrate_file -- [POINTS] [OUTPUT_DIR] [CONFIG_JSON]
//! ```
//!
//! `POINTS` defaults to `demos/points.txt`. For every model the best
//! constants are written to `OUTPUT_DIR/<model>_constants.txt`. Set
//! `RUST_LOG=psycal_rs=debug` to see each backend's progress.

use std::path::PathBuf;

use psycal_rs::io::load_points;
use psycal_rs::{CalibrationConfig, Calibrator, ModelKind};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("psycal_rs=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let points_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demos/points.txt"));
    let output_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let config = match args.next() {
        Some(path) => CalibrationConfig::from_json_file(path)?,
        None => CalibrationConfig::default(),
    };

    println!("Psychrometric formula calibration");
    println!("=================================\n");

    let loaded = load_points(&points_path)?;
    for skipped in &loaded.skipped {
        println!(
            "Skipped line {}: {:?} ({})",
            skipped.line, skipped.content, skipped.reason
        );
    }
    println!(
        "Loaded {} points from {}\n",
        loaded.dataset.len(),
        points_path.display()
    );

    let calibrator = Calibrator::new(config)?;
    let mut summary = Vec::new();

    for kind in ModelKind::ALL {
        let report = calibrator.calibrate_all(&loaded.dataset, kind, None)?;
        println!("{}", report);

        match report.best() {
            Some(best) => {
                let path = output_dir.join(format!("{}_constants.txt", kind.name()));
                report.best_constants_file()?.save(&path)?;
                println!("Constants written to {}\n", path.display());
                summary.push((kind, best.fit.method.clone(), best.metrics.rmse));
            }
            None => println!("No usable fit for {}\n", kind.label()),
        }
    }

    println!("Summary");
    println!("-------");
    for (kind, method, rmse) in &summary {
        println!("{:<28} {:<24} RMSE = {:.4}", kind.label(), method, rmse);
    }

    Ok(())
}
