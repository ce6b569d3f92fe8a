use clap::Parser;
use flume_lbm::vector::Vec3;
use flume_lbm::{pipeline, QualityTier, RunRequest, RunState, SimError};
use log::{error, info};
use std::path::PathBuf;

/// Simulate gravity-driven fluid flow through a triangulated flume mesh and
/// write a tracer-particle trajectory artifact.
#[derive(Parser, Debug)]
#[command(name = "flume-sim", version, about)]
struct Cli {
    /// Path to the binary STL mesh to voxelize.
    #[arg(short, long)]
    mesh: PathBuf,

    /// Gravity direction, three comma-separated components (need not be unit).
    #[arg(long, default_value = "0,0,-1")]
    gravity: String,

    /// Source point in mesh millimetres, three comma-separated components.
    #[arg(long)]
    source: String,

    /// Volumetric flow rate in gallons per hour.
    #[arg(long, default_value_t = 100.0)]
    flow_gph: f32,

    /// Quality tier: low, medium, or high.
    #[arg(long, default_value = "medium")]
    quality: String,

    /// Output path for the compressed .npz artifact.
    #[arg(short, long, default_value = "result.npz")]
    output: PathBuf,
}

fn parse_vec3(s: &str, field: &str) -> Result<Vec3, SimError> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(SimError::BadInput(format!(
            "{field} must be three comma-separated numbers, got '{s}'"
        )));
    }
    let mut v = [0.0f32; 3];
    for (i, p) in parts.iter().enumerate() {
        v[i] = p
            .trim()
            .parse::<f32>()
            .map_err(|e| SimError::BadInput(format!("{field} component '{p}' is not a number: {e}")))?;
    }
    Ok(Vec3::new(v[0], v[1], v[2]))
}

fn main() -> Result<(), SimError> {
    env_logger::init();
    let cli = Cli::parse();

    let result = run(cli);
    if let Err(e) = &result {
        eprintln!("{e}");
    }
    result
}

fn run(cli: Cli) -> Result<(), SimError> {
    let gravity = parse_vec3(&cli.gravity, "--gravity")?;
    let source_point_mm = parse_vec3(&cli.source, "--source")?;
    let quality = QualityTier::parse(&cli.quality)?;

    let request = RunRequest {
        mesh_path: cli.mesh,
        gravity,
        source_point_mm,
        flow_gph: cli.flow_gph,
        quality,
        out_path: cli.output,
    };

    info!("starting run: {:?}", request.mesh_path);
    pipeline::run(&request, |state, progress, message| match state {
        RunState::Running => info!("[{:>5.1}%] {message}", progress * 100.0),
        RunState::Done => info!("done: {message}"),
        RunState::Error => error!("run failed: {message}"),
        RunState::Queued => info!("queued"),
    })
}
