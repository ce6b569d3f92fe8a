//! Voxelizer: turns a triangle mesh plus user-supplied gravity and source
//! point into a regular grid with solid/inlet/outlet masks and a lattice-unit
//! gravity vector (SPEC_FULL.md §4.1).

use crate::error::{Result, SimError};
use crate::mesh::TriangleMesh;
use crate::vector::{normalize_or_fallback, Vec3};
use ndarray::{Array1, Array3};
use log::{debug, warn};

const NU_PHYS: f32 = 1.004e-6; // m^2/s, water at ~20C
const G_PHYS: f32 = 9.81; // m/s^2
const GRAVITY_LBM_MIN: f32 = 1e-6;
const GRAVITY_LBM_MAX: f32 = 5e-4;
const PADDING_MM: f32 = 5.0;
const MIN_DIM: usize = 32;
const MAX_DIM: usize = 320;

/// Regular-grid simulation domain built from a voxelized mesh.
pub struct Domain {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub x_coords: Array1<f32>,
    pub y_coords: Array1<f32>,
    pub z_coords: Array1<f32>,
    pub solid: Array3<bool>,
    pub inlet: Array3<bool>,
    pub outlet: Array3<bool>,
    pub gravity_dir: Vec3,
    pub gravity_lbm: Vec3,
    pub dx_m: f32,
    pub source_point_mm: Vec3,
    /// Human-readable trace of clamp/retarget decisions, surfaced in
    /// [`SimError::DomainConstruction`] on failure and logged at `debug` on
    /// success.
    pub trace: Vec<String>,
}

impl Domain {
    /// Convert a physical flow rate (gallons per hour) to an inlet speed in
    /// lattice units, clamped to the Mach-number-safe band.
    pub fn inlet_speed_lbm(&self, flow_gph: f32, nu_lbm: f32) -> f32 {
        let q_m3s = flow_gph * 3.785411784e-3 / 3600.0;
        let r_m = 0.010_f32;
        let a_m2 = std::f32::consts::PI * r_m * r_m;
        let inlet_u_phys = q_m3s / a_m2.max(1e-12);

        let dt_s = nu_lbm * self.dx_m * self.dx_m / NU_PHYS;
        let inlet_u_lbm = inlet_u_phys * dt_s / self.dx_m;
        inlet_u_lbm.clamp(0.001, 0.08)
    }
}

fn normalize_gravity(g: Vec3) -> Vec3 {
    normalize_or_fallback(g, Vec3::new(0.0, 0.0, -1.0))
}

fn dims_from_bounds(range: Vec3, base_resolution: usize) -> (usize, usize, usize) {
    let l = range.x.max(range.y).max(range.z).max(1e-6);
    let dim = |r: f32| -> usize {
        let n = (base_resolution as f32 * r / l).round() as i64;
        n.clamp(MIN_DIM as i64, MAX_DIM as i64) as usize
    };
    (dim(range.x), dim(range.y), dim(range.z))
}

fn compute_gravity_lbm(gravity_dir: Vec3, dx_m: f32, nu_lbm: f32) -> Vec3 {
    let dt_s = nu_lbm * dx_m * dx_m / NU_PHYS;
    let g_lbm_scalar = (G_PHYS * dt_s * dt_s / dx_m).clamp(GRAVITY_LBM_MIN, GRAVITY_LBM_MAX);
    gravity_dir * g_lbm_scalar
}

/// Resolve the user's requested source point against the mesh bounds,
/// returning the accepted point and a human-readable trace entry describing
/// which of the three clamping rules fired (SPEC_FULL.md §4.1).
fn resolve_source_point(mesh: &TriangleMesh, requested: Vec3, trace: &mut Vec<String>) -> Vec3 {
    let b = mesh.bounds;
    if b.contains(requested) {
        trace.push("source point accepted as-is (inside mesh bounds)".to_string());
        return requested;
    }

    let mesh_center = b.center();
    let max_dim = b.max_dim();
    let centered = requested + mesh_center;
    let bound_margin = max_dim * 0.10;
    let centered_in_bounds = centered.x >= b.x0 - bound_margin
        && centered.x <= b.x1 + bound_margin
        && centered.y >= b.y0 - bound_margin
        && centered.y <= b.y1 + bound_margin
        && centered.z >= b.z0 - bound_margin
        && centered.z <= b.z1 + bound_margin;

    if centered_in_bounds && mesh_center.norm() > 0.5 * max_dim {
        let margin = 1.0_f32;
        let clamped = Vec3::new(
            centered.x.clamp(b.x0 + margin, b.x1 - margin),
            centered.y.clamp(b.y0 + margin, b.y1 - margin),
            centered.z.clamp(b.z0 + margin, b.z1 - margin),
        );
        trace.push(format!(
            "source point outside bounds; applied mesh-center offset {mesh_center:?} then clamped with 1mm margin -> {clamped:?}"
        ));
        return clamped;
    }

    let margin = max_dim * 0.05;
    let clamped = Vec3::new(
        requested.x.clamp(b.x0 + margin, b.x1 - margin),
        requested.y.clamp(b.y0 + margin, b.y1 - margin),
        requested.z.clamp(b.z0 + margin, b.z1 - margin),
    );
    trace.push(format!(
        "source point outside bounds; clamped directly to mesh bounds with 5% margin -> {clamped:?}"
    ));
    clamped
}

/// Voxelize `mesh` into a [`Domain`]. `base_resolution` is the target cell
/// count along the mesh's longest axis; `gravity` is the (not necessarily
/// unit) gravity direction; `source_point_mm` is the user-requested inlet
/// location; `nu_lbm` is the solver's lattice viscosity.
pub fn build_domain(
    mesh: &TriangleMesh,
    base_resolution: usize,
    gravity: Vec3,
    source_point_mm: Vec3,
    nu_lbm: f32,
) -> Result<Domain> {
    let mut trace = Vec::new();
    let b = mesh.bounds;
    let mesh_size = b.size();

    debug!(
        "voxelizing mesh: bounds x=[{:.1},{:.1}] y=[{:.1},{:.1}] z=[{:.1},{:.1}]",
        b.x0, b.x1, b.y0, b.y1, b.z0, b.z1
    );

    let source_point_mm = resolve_source_point(mesh, source_point_mm, &mut trace);

    let (nx, ny, nz) = dims_from_bounds(mesh_size, base_resolution);
    trace.push(format!("grid dimensions {nx}x{ny}x{nz}"));

    let x_coords = Array1::linspace(b.x0 - PADDING_MM, b.x1 + PADDING_MM, nx);
    let y_coords = Array1::linspace(b.y0 - PADDING_MM, b.y1 + PADDING_MM, ny);
    let z_coords = Array1::linspace(b.z0 - PADDING_MM, b.z1 + PADDING_MM, nz);

    // Fluid is the interior of the mesh (a flume/channel); the complement is
    // solid. Parallelized over the x-slab since each cell's point-in-mesh
    // test is independent.
    let mut solid = Array3::<bool>::from_elem((nx, ny, nz), true);
    {
        use rayon::prelude::*;
        let slabs: Vec<Vec<bool>> = (0..nx)
            .into_par_iter()
            .map(|i| {
                let mut slab = vec![true; ny * nz];
                let x = x_coords[i];
                for j in 0..ny {
                    let y = y_coords[j];
                    for k in 0..nz {
                        let z = z_coords[k];
                        let inside = mesh.contains_point(Vec3::new(x, y, z));
                        slab[j * nz + k] = !inside;
                    }
                }
                slab
            })
            .collect();
        for (i, slab) in slabs.into_iter().enumerate() {
            for j in 0..ny {
                for k in 0..nz {
                    solid[[i, j, k]] = slab[j * nz + k];
                }
            }
        }
    }

    let fluid_count = solid.iter().filter(|s| !**s).count();
    trace.push(format!("fluid cells: {fluid_count} / {}", nx * ny * nz));
    if fluid_count == 0 {
        return Err(SimError::DomainConstruction {
            message: "mesh produced zero fluid cells (not closed, or entirely fills its bounding box)".to_string(),
            trace,
        });
    }

    let gravity_dir = normalize_gravity(gravity);
    let dx_mm = (x_coords[1] - x_coords[0])
        .min(y_coords[1] - y_coords[0])
        .min(z_coords[1] - z_coords[0]);
    let dx_m = dx_mm / 1000.0;
    let gravity_lbm = compute_gravity_lbm(gravity_dir, dx_m, nu_lbm);

    let source_radius_mm = 20.0_f32.max(10.0 * dx_mm);
    let select_sphere = |center: Vec3, radius: f32| -> Array3<bool> {
        let mut sel = Array3::<bool>::from_elem((nx, ny, nz), false);
        for i in 0..nx {
            let dx = x_coords[i] - center.x;
            for j in 0..ny {
                let dy = y_coords[j] - center.y;
                for k in 0..nz {
                    let dz = z_coords[k] - center.z;
                    if (dx * dx + dy * dy + dz * dz).sqrt() <= radius {
                        sel[[i, j, k]] = true;
                    }
                }
            }
        }
        sel
    };

    let mut inlet = select_sphere(source_point_mm, source_radius_mm);
    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                if solid[[i, j, k]] {
                    inlet[[i, j, k]] = false;
                }
            }
        }
    }

    let mut source_point_mm = source_point_mm;
    let mut inlet_count = inlet.iter().filter(|v| **v).count();
    if inlet_count == 0 {
        warn!("no inlet cells at source point, searching nearest fluid cluster");
        let mut fluid_pts: Vec<(usize, usize, usize, f32)> = Vec::new();
        for i in 0..nx {
            let dx = x_coords[i] - source_point_mm.x;
            for j in 0..ny {
                let dy = y_coords[j] - source_point_mm.y;
                for k in 0..nz {
                    if !solid[[i, j, k]] {
                        let dz = z_coords[k] - source_point_mm.z;
                        fluid_pts.push((i, j, k, dx * dx + dy * dy + dz * dz));
                    }
                }
            }
        }
        fluid_pts.sort_by(|a, b| a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal));
        let n_target = 100usize.max((fluid_count as f32 * 0.01) as usize).min(fluid_pts.len());

        let mut new_inlet = Array3::<bool>::from_elem((nx, ny, nz), false);
        let mut centroid = Vec3::zeros();
        for &(i, j, k, _) in fluid_pts.iter().take(n_target) {
            new_inlet[[i, j, k]] = true;
            centroid += Vec3::new(x_coords[i], y_coords[j], z_coords[k]);
        }
        centroid /= n_target as f32;
        inlet = new_inlet;
        source_point_mm = centroid;
        inlet_count = n_target;
        trace.push(format!(
            "no inlet at source point; retargeted to {n_target} nearest fluid cells, centroid {source_point_mm:?}"
        ));
    } else {
        trace.push(format!("inlet cells at source point: {inlet_count}"));
    }

    if inlet_count == 0 {
        return Err(SimError::DomainConstruction {
            message: "no feasible inlet cluster found".to_string(),
            trace,
        });
    }

    // Lowest-10%-by-projection vertex set defines the outlet target.
    let mut projections: Vec<(Vec3, f32)> = mesh.vertices().map(|v| (v, v.dot(&gravity_dir))).collect();
    projections.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let low_count = ((projections.len() as f32) * 0.10).floor().max(1.0) as usize;
    let low_center = if low_count > 0 {
        let sum: Vec3 = projections.iter().take(low_count).map(|(v, _)| *v).sum();
        sum / low_count as f32
    } else {
        projections[0].0
    };

    let outlet_radius_mm = source_radius_mm * 1.5;
    let mut outlet = select_sphere(low_center, outlet_radius_mm);
    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                if solid[[i, j, k]] {
                    outlet[[i, j, k]] = false;
                }
            }
        }
    }
    trace.push(format!(
        "outlet center {low_center:?}, radius {outlet_radius_mm:.1}mm, cells: {}",
        outlet.iter().filter(|v| **v).count()
    ));

    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                if inlet[[i, j, k]] || outlet[[i, j, k]] {
                    solid[[i, j, k]] = false;
                }
            }
        }
    }

    debug!("voxelization complete: {fluid_count} fluid cells, {inlet_count} inlet cells");

    Ok(Domain {
        nx,
        ny,
        nz,
        x_coords,
        y_coords,
        z_coords,
        solid,
        inlet,
        outlet,
        gravity_dir,
        gravity_lbm,
        dx_m,
        source_point_mm,
        trace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriangleMesh;

    fn unit_cube() -> TriangleMesh {
        let c = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
        let faces: [[Vec3; 4]; 6] = [
            [c(0., 0., 0.), c(10., 0., 0.), c(10., 10., 0.), c(0., 10., 0.)],
            [c(0., 0., 10.), c(10., 0., 10.), c(10., 10., 10.), c(0., 10., 10.)],
            [c(0., 0., 0.), c(10., 0., 0.), c(10., 0., 10.), c(0., 0., 10.)],
            [c(0., 10., 0.), c(10., 10., 0.), c(10., 10., 10.), c(0., 10., 10.)],
            [c(0., 0., 0.), c(0., 10., 0.), c(0., 10., 10.), c(0., 0., 10.)],
            [c(10., 0., 0.), c(10., 10., 0.), c(10., 10., 10.), c(10., 0., 10.)],
        ];
        let mut tris = Vec::new();
        for quad in faces {
            tris.push([quad[0], quad[1], quad[2]]);
            tris.push([quad[0], quad[2], quad[3]]);
        }
        TriangleMesh::from_triangles(tris).unwrap()
    }

    #[test]
    fn domain_has_fluid_cells_and_disjoint_masks() {
        let mesh = unit_cube();
        let domain = build_domain(&mesh, 32, Vec3::new(0.0, 0.0, -1.0), Vec3::new(5.0, 5.0, 5.0), 0.06).unwrap();
        let fluid = domain.solid.iter().filter(|s| !**s).count();
        assert!(fluid > 0);
        for ((s, i), o) in domain
            .solid
            .iter()
            .zip(domain.inlet.iter())
            .zip(domain.outlet.iter())
        {
            if *i || *o {
                assert!(!s);
            }
        }
    }

    #[test]
    fn gravity_lbm_is_clamped_and_aligned() {
        let mesh = unit_cube();
        let domain = build_domain(&mesh, 32, Vec3::new(0.0, 0.0, -5.0), Vec3::new(5.0, 5.0, 5.0), 0.06).unwrap();
        let mag = domain.gravity_lbm.norm();
        assert!(mag >= GRAVITY_LBM_MIN - 1e-9 && mag <= GRAVITY_LBM_MAX + 1e-9);
        assert!(domain.gravity_dir.z < 0.0);
    }

    #[test]
    fn source_point_far_outside_bounds_is_clamped() {
        let mesh = unit_cube();
        let domain = build_domain(&mesh, 32, Vec3::new(0.0, 0.0, -1.0), Vec3::new(1000.0, 1000.0, 1000.0), 0.06).unwrap();
        assert!(mesh.bounds.contains(domain.source_point_mm) || domain.inlet.iter().any(|v| *v));
    }

    #[test]
    fn inlet_speed_respects_clamp_band() {
        let mesh = unit_cube();
        let domain = build_domain(&mesh, 32, Vec3::new(0.0, 0.0, -1.0), Vec3::new(5.0, 5.0, 5.0), 0.06).unwrap();
        let u = domain.inlet_speed_lbm(0.0, 0.06);
        assert!((0.001..=0.08).contains(&u));
        let u_big = domain.inlet_speed_lbm(1.0e9, 0.06);
        assert!((u_big - 0.08).abs() < 1e-6);
    }
}
