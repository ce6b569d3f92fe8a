//! Orchestrates a single run end to end: load mesh, voxelize, iterate the
//! LBM to pseudo-steady state, build the SDF, advect tracer particles, write
//! the artifact. Reports coarse progress checkpoints and translates every
//! fallible stage into a [`SimError`] (SPEC_FULL.md §6, §8).

use crate::error::{Result, SimError};
use crate::mesh::{self, TriangleMesh};
use crate::output::{self, Artifact};
use crate::vector::Vec3;
use crate::{advect, lbm, voxel};
use log::{debug, error, info};
use serde::Serialize;
use std::path::Path;

/// Structured failure record, logged as JSON alongside the human-readable
/// progress message so a host process running under `env_logger` gets a
/// machine-parseable trace without needing the progress callback.
#[derive(Serialize)]
struct ErrorReport<'a> {
    message: &'a str,
    trace: &'a [String],
}

/// Fixed per-tier parameter table (SPEC_FULL.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(QualityTier::Low),
            "medium" => Ok(QualityTier::Medium),
            "high" => Ok(QualityTier::High),
            other => Err(SimError::BadInput(format!("unrecognized quality tier '{other}'"))),
        }
    }

    fn params(self) -> TierParams {
        match self {
            QualityTier::Low => TierParams {
                base_res: 128,
                iterations: 800,
                frames: 300,
                particles: 15_000,
                nu_lbm: 0.08,
            },
            QualityTier::Medium => TierParams {
                base_res: 192,
                iterations: 1_500,
                frames: 450,
                particles: 40_000,
                nu_lbm: 0.06,
            },
            QualityTier::High => TierParams {
                base_res: 256,
                iterations: 3_000,
                frames: 600,
                particles: 80_000,
                nu_lbm: 0.05,
            },
        }
    }
}

struct TierParams {
    base_res: usize,
    iterations: usize,
    frames: u32,
    particles: usize,
    nu_lbm: f32,
}

/// The request contract an orchestrator caller supplies (SPEC_FULL.md §6).
pub struct RunRequest {
    pub mesh_path: std::path::PathBuf,
    pub gravity: Vec3,
    pub source_point_mm: Vec3,
    pub flow_gph: f32,
    pub quality: QualityTier,
    pub out_path: std::path::PathBuf,
}

/// Coarse run state surfaced to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Running,
    Done,
    Error,
}

/// Byte ceiling for the lattice distribution buffer plus macroscopic fields,
/// checked before allocation (SPEC_FULL.md §7).
const MAX_LATTICE_BYTES: u64 = 8_000_000_000;
/// Byte ceiling for the particle trajectory buffer.
const MAX_TRAJECTORY_BYTES: u64 = 4_000_000_000;

fn check_resource_limits(nx: usize, ny: usize, nz: usize, n_frames: u32, n_particles: usize) -> Result<()> {
    let cells = nx as u64 * ny as u64 * nz as u64;
    let lattice_bytes = 19 * 4 * cells + 5 * 4 * cells;
    if lattice_bytes > MAX_LATTICE_BYTES {
        return Err(SimError::ResourceExhausted(format!(
            "grid {nx}x{ny}x{nz} would need {lattice_bytes} bytes for the lattice, exceeding the {MAX_LATTICE_BYTES} byte ceiling"
        )));
    }
    let trajectory_bytes = 4u64 * 3 * n_frames as u64 * n_particles as u64;
    if trajectory_bytes > MAX_TRAJECTORY_BYTES {
        return Err(SimError::ResourceExhausted(format!(
            "{n_frames} frames x {n_particles} particles would need {trajectory_bytes} bytes for the trajectory buffer, exceeding the {MAX_TRAJECTORY_BYTES} byte ceiling"
        )));
    }
    Ok(())
}

/// Run one simulation end to end. `progress` is invoked at each checkpoint
/// with `(state, progress_fraction, message)`; ordering is monotonic in the
/// fraction. On any failure the callback fires once more with `RunState::Error`
/// and no artifact is written.
pub fn run(request: &RunRequest, mut progress: impl FnMut(RunState, f32, &str)) -> Result<()> {
    match run_inner(request, &mut progress) {
        Ok(()) => {
            progress(RunState::Done, 1.0, "done");
            Ok(())
        }
        Err(err) => {
            let message = err.to_string();
            let trace: &[String] = match &err {
                SimError::DomainConstruction { trace, .. } => trace,
                _ => &[],
            };
            let report = ErrorReport { message: &message, trace };
            match serde_json::to_string(&report) {
                Ok(json) => error!("run failed: {json}"),
                Err(_) => error!("run failed: {message}"),
            }
            progress(RunState::Error, 1.0, &message);
            Err(err)
        }
    }
}

fn run_inner(request: &RunRequest, progress: &mut impl FnMut(RunState, f32, &str)) -> Result<()> {
    progress(RunState::Running, 0.01, "loading mesh");
    let mesh = load_mesh(&request.mesh_path)?;
    info!("mesh loaded: {} triangles", mesh.triangles.len());

    let params = request.quality.params();

    progress(RunState::Running, 0.08, "voxelizing domain");
    let domain = voxel::build_domain(
        &mesh,
        params.base_res,
        request.gravity,
        request.source_point_mm,
        params.nu_lbm,
    )?;
    debug!("domain voxelized: {}", domain.trace.join("; "));

    check_resource_limits(domain.nx, domain.ny, domain.nz, params.frames, params.particles)?;

    progress(RunState::Running, 0.12, "initializing LBM");
    let inlet_speed = domain.inlet_speed_lbm(request.flow_gph, params.nu_lbm);
    let mut solver = lbm::LbmSolver::new(
        domain.solid.clone(),
        domain.inlet.clone(),
        domain.outlet.clone(),
        params.nu_lbm,
        domain.gravity_lbm,
        inlet_speed,
        domain.gravity_dir,
    );

    let n_iter = params.iterations;
    let checkpoint_every = (n_iter / 20).max(1);
    for i in 0..n_iter {
        solver.step();
        if (i + 1) % checkpoint_every == 0 {
            let fraction = 0.12 + 0.58 * (i + 1) as f32 / n_iter as f32;
            progress(RunState::Running, fraction, &format!("LBM iterations {}/{n_iter}", i + 1));
        }
    }

    progress(RunState::Running, 0.72, "extracting velocity field");
    let ux = solver.ux.view();
    let uy = solver.uy.view();
    let uz = solver.uz.view();

    progress(RunState::Running, 0.75, "building signed distance field");
    let spacing = (
        domain.x_coords[1] - domain.x_coords[0],
        domain.y_coords[1] - domain.y_coords[0],
        domain.z_coords[1] - domain.z_coords[0],
    );
    let sdf = advect::build_sdf(&domain.solid, spacing);

    progress(RunState::Running, 0.78, "advecting particles");
    let mut advector = advect::Advector::new(
        &domain.x_coords,
        &domain.y_coords,
        &domain.z_coords,
        ux,
        uy,
        uz,
        sdf.view(),
        domain.source_point_mm,
        domain.gravity_dir,
        params.particles,
        params.frames,
    );
    let (frames, n_collisions, n_decayed) = advector.run(params.frames, domain.source_point_mm);
    debug!("advection complete: {n_collisions} collisions, {n_decayed} respawns");

    progress(RunState::Running, 0.95, "saving result");
    let artifact = Artifact {
        x_coords: &domain.x_coords,
        y_coords: &domain.y_coords,
        z_coords: &domain.z_coords,
        frames: &frames,
        solid: &domain.solid,
        fill_level: &solver.fill_level,
    };
    output::write_artifact(&artifact, &request.out_path)?;

    Ok(())
}

fn load_mesh(path: &Path) -> Result<TriangleMesh> {
    mesh::load_binary_stl(path)
}
