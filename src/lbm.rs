//! D3Q19 BGK lattice Boltzmann solver with Guo gravity forcing, bounce-back
//! solids, a Dirichlet inlet, and a pressure outlet. Owns its own state and
//! exposes a single `step()` that advances exactly one iteration.

use crate::lattice::{self, C, OPP, Q};
use crate::vector::Vec3;
use ndarray::{Array3, Array4};
use rayon::prelude::*;

/// Relaxation time floor; the solver is unstable at or below this.
const TAU_MIN: f32 = 0.5;
const MAX_INLET_SPEED: f32 = 0.08;
const FILL_RELAXATION: f32 = 0.08;

pub struct LbmSolver {
    nx: usize,
    ny: usize,
    nz: usize,
    f: Array4<f32>,
    f_next: Array4<f32>,
    pub rho: Array3<f32>,
    pub ux: Array3<f32>,
    pub uy: Array3<f32>,
    pub uz: Array3<f32>,
    pub fill_level: Array3<f32>,
    solid: Array3<bool>,
    inlet: Array3<bool>,
    outlet: Array3<bool>,
    tau: f32,
    omega: f32,
    gravity: Vec3,
    inlet_speed: f32,
    inlet_dir: Vec3,
}

impl LbmSolver {
    /// Build a solver over `solid`/`inlet`/`outlet` masks (all same shape).
    /// `nu_lbm` is the lattice viscosity, `gravity` the lattice-unit body
    /// force (already clamped by the voxelizer), `inlet_speed`/`inlet_dir`
    /// the Dirichlet inlet condition.
    pub fn new(
        solid: Array3<bool>,
        inlet: Array3<bool>,
        outlet: Array3<bool>,
        nu_lbm: f32,
        gravity: Vec3,
        inlet_speed: f32,
        inlet_dir: Vec3,
    ) -> Self {
        let tau = 3.0 * nu_lbm + 0.5;
        debug_assert!(tau > TAU_MIN, "relaxation time {tau} must exceed {TAU_MIN}");
        debug_assert!(
            inlet_speed.abs() <= MAX_INLET_SPEED,
            "inlet speed {inlet_speed} exceeds Mach-safe bound {MAX_INLET_SPEED}"
        );
        let omega = 1.0 / tau;

        let (nx, ny, nz) = solid.dim();
        let mut f = Array4::<f32>::zeros((nx, ny, nz, Q));
        for q in 0..Q {
            f.index_axis_mut(ndarray::Axis(3), q).fill(lattice::W[q]);
        }
        let fill_level = Array3::from_shape_fn((nx, ny, nz), |idx| if inlet[idx] { 1.0 } else { 0.0 });
        let f_next = f.clone();

        Self {
            nx,
            ny,
            nz,
            f,
            f_next,
            rho: Array3::from_elem((nx, ny, nz), 1.0),
            ux: Array3::zeros((nx, ny, nz)),
            uy: Array3::zeros((nx, ny, nz)),
            uz: Array3::zeros((nx, ny, nz)),
            fill_level,
            solid,
            inlet,
            outlet,
            tau,
            omega,
            gravity,
            inlet_speed,
            inlet_dir,
        }
    }

    /// Advance the lattice by one step: collide (with Guo forcing) → stream →
    /// boundaries → macroscopic update → fill-level transport.
    pub fn step(&mut self) {
        self.collide();
        self.stream();
        self.apply_boundaries();
        self.compute_macroscopic();
        self.transport_fill();

        debug_assert!(self.tau > TAU_MIN);
        debug_assert!(self.rho.iter().all(|r| r.is_finite()));
    }

    /// Runs collision row-by-row (fixed `i`) in parallel, each row computing
    /// its own post-collision distributions independently.
    fn collide(&mut self) {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        let gravity = self.gravity;
        let omega = self.omega;
        let skip_forcing = gravity.norm() < 1e-12;
        let rho = &self.rho;
        let ux = &self.ux;
        let uy = &self.uy;
        let uz = &self.uz;
        let f = &self.f;

        let rows: Vec<Vec<f32>> = (0..nx)
            .into_par_iter()
            .map(|i| {
                let mut row = vec![0.0f32; ny * nz * Q];
                for j in 0..ny {
                    for k in 0..nz {
                        let r = rho[[i, j, k]];
                        let u = (ux[[i, j, k]], uy[[i, j, k]], uz[[i, j, k]]);
                        let base = (j * nz + k) * Q;
                        for q in 0..Q {
                            let feq = lattice::equilibrium(q, r, u.0, u.1, u.2);
                            let fold = f[[i, j, k, q]];
                            let mut val = fold - omega * (fold - feq);
                            if !skip_forcing {
                                let cx = C[q][0] as f32;
                                let cy = C[q][1] as f32;
                                let cz = C[q][2] as f32;
                                let cu = cx * u.0 + cy * u.1 + cz * u.2;
                                let bracket_x = (cx - u.0) + 3.0 * cu * cx;
                                let bracket_y = (cy - u.1) + 3.0 * cu * cy;
                                let bracket_z = (cz - u.2) + 3.0 * cu * cz;
                                val += 3.0
                                    * (1.0 - omega / 2.0)
                                    * lattice::W[q]
                                    * r
                                    * (bracket_x * gravity.x + bracket_y * gravity.y + bracket_z * gravity.z);
                            }
                            row[base + q] = val;
                        }
                    }
                }
                row
            })
            .collect();

        for (i, row) in rows.into_iter().enumerate() {
            for j in 0..ny {
                for k in 0..nz {
                    let base = (j * nz + k) * Q;
                    for q in 0..Q {
                        self.f[[i, j, k, q]] = row[base + q];
                    }
                }
            }
        }
    }

    /// Cyclic-shift streaming with wraparound; the outer shell is solid after
    /// padding, so wraparound at the box edges never reaches a live cell.
    fn stream(&mut self) {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        let f = &self.f;

        let rows: Vec<Vec<f32>> = (0..nx)
            .into_par_iter()
            .map(|i| {
                let mut row = vec![0.0f32; ny * nz * Q];
                for j in 0..ny {
                    for k in 0..nz {
                        let base = (j * nz + k) * Q;
                        for q in 0..Q {
                            let si = (i as i64 - C[q][0] as i64).rem_euclid(nx as i64) as usize;
                            let sj = (j as i64 - C[q][1] as i64).rem_euclid(ny as i64) as usize;
                            let sk = (k as i64 - C[q][2] as i64).rem_euclid(nz as i64) as usize;
                            row[base + q] = f[[si, sj, sk, q]];
                        }
                    }
                }
                row
            })
            .collect();

        for (i, row) in rows.into_iter().enumerate() {
            for j in 0..ny {
                for k in 0..nz {
                    let base = (j * nz + k) * Q;
                    for q in 0..Q {
                        self.f_next[[i, j, k, q]] = row[base + q];
                    }
                }
            }
        }
        std::mem::swap(&mut self.f, &mut self.f_next);
    }

    fn apply_boundaries(&mut self) {
        let inlet_u = self.inlet_dir * self.inlet_speed;
        for i in 0..self.nx {
            for j in 0..self.ny {
                for k in 0..self.nz {
                    if self.solid[[i, j, k]] {
                        let mut swapped = [0.0f32; Q];
                        for q in 0..Q {
                            swapped[q] = self.f[[i, j, k, OPP[q]]];
                        }
                        for q in 0..Q {
                            self.f[[i, j, k, q]] = swapped[q];
                        }
                    } else if self.inlet[[i, j, k]] {
                        for q in 0..Q {
                            self.f[[i, j, k, q]] =
                                lattice::equilibrium(q, 1.0, inlet_u.x, inlet_u.y, inlet_u.z);
                        }
                    } else if self.outlet[[i, j, k]] {
                        let rho: f32 = (0..Q).map(|q| self.f[[i, j, k, q]]).sum();
                        let scale = 1.0 / rho.max(1e-10);
                        for q in 0..Q {
                            self.f[[i, j, k, q]] *= scale;
                        }
                    }
                }
            }
        }
    }

    fn compute_macroscopic(&mut self) {
        let gravity = self.gravity;
        for i in 0..self.nx {
            for j in 0..self.ny {
                for k in 0..self.nz {
                    let mut sum_rho = 0.0f32;
                    let mut mx = 0.0f32;
                    let mut my = 0.0f32;
                    let mut mz = 0.0f32;
                    for q in 0..Q {
                        let v = self.f[[i, j, k, q]];
                        sum_rho += v;
                        mx += v * C[q][0] as f32;
                        my += v * C[q][1] as f32;
                        mz += v * C[q][2] as f32;
                    }
                    sum_rho = sum_rho.max(1e-10);
                    self.rho[[i, j, k]] = sum_rho;

                    if self.solid[[i, j, k]] {
                        self.ux[[i, j, k]] = 0.0;
                        self.uy[[i, j, k]] = 0.0;
                        self.uz[[i, j, k]] = 0.0;
                        continue;
                    }
                    self.ux[[i, j, k]] = mx / sum_rho + 0.5 * gravity.x;
                    self.uy[[i, j, k]] = my / sum_rho + 0.5 * gravity.y;
                    self.uz[[i, j, k]] = mz / sum_rho + 0.5 * gravity.z;
                }
            }
        }
    }

    fn transport_fill(&mut self) {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        let prev = self.fill_level.clone();

        let neighbor = |i: i64, j: i64, k: i64| -> Option<(usize, usize, usize)> {
            if i < 0 || j < 0 || k < 0 || i as usize >= nx || j as usize >= ny || k as usize >= nz {
                None
            } else {
                Some((i as usize, j as usize, k as usize))
            }
        };

        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    if self.solid[[i, j, k]] {
                        self.fill_level[[i, j, k]] = 0.0;
                        continue;
                    }
                    if self.inlet[[i, j, k]] {
                        self.fill_level[[i, j, k]] = 1.0;
                        continue;
                    }

                    let ux = self.ux[[i, j, k]];
                    let uy = self.uy[[i, j, k]];
                    let uz = self.uz[[i, j, k]];
                    let mut delta = 0.0f32;

                    let axes: [(f32, i64, i64, i64); 3] = [(ux, 1, 0, 0), (uy, 0, 1, 0), (uz, 0, 0, 1)];
                    for (u, dx, dy, dz) in axes {
                        let upwind_sign: i64 = if u >= 0.0 { -1 } else { 1 };
                        if let Some((ui, uj, uk)) = neighbor(
                            i as i64 + upwind_sign * dx,
                            j as i64 + upwind_sign * dy,
                            k as i64 + upwind_sign * dz,
                        ) {
                            let upwind_fill = prev[[ui, uj, uk]];
                            delta += (upwind_fill - prev[[i, j, k]]) * u.abs();
                        }
                    }

                    let updated = prev[[i, j, k]] + FILL_RELAXATION * delta;
                    self.fill_level[[i, j, k]] = updated.clamp(0.0, 1.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_solver(gravity: Vec3) -> LbmSolver {
        let shape = (6, 4, 4);
        let mut solid = Array3::<bool>::from_elem(shape, false);
        // Solid shell around the box (so streaming wraparound never hits a
        // live cell), matching how the voxelizer always pads with a solid
        // border.
        for i in 0..shape.0 {
            for j in 0..shape.1 {
                for k in 0..shape.2 {
                    if i == 0 || i == shape.0 - 1 || j == 0 || j == shape.1 - 1 || k == 0 || k == shape.2 - 1 {
                        solid[[i, j, k]] = true;
                    }
                }
            }
        }
        let mut inlet = Array3::<bool>::from_elem(shape, false);
        inlet[[1, 1, 1]] = true;
        solid[[1, 1, 1]] = false;
        let outlet = Array3::<bool>::from_elem(shape, false);

        LbmSolver::new(solid, inlet, outlet, 0.06, gravity, 0.02, Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn density_stays_finite_and_positive_over_steps() {
        let mut solver = tiny_solver(Vec3::new(0.0, 0.0, -1e-4));
        for _ in 0..20 {
            solver.step();
        }
        for &rho in solver.rho.iter() {
            assert!(rho.is_finite());
            assert!(rho > 0.0);
        }
    }

    #[test]
    fn solid_cells_have_zero_velocity() {
        let mut solver = tiny_solver(Vec3::zeros());
        for _ in 0..5 {
            solver.step();
        }
        for i in 0..solver.nx {
            for j in 0..solver.ny {
                for k in 0..solver.nz {
                    if solver.solid[[i, j, k]] {
                        assert_eq!(solver.ux[[i, j, k]], 0.0);
                        assert_eq!(solver.uy[[i, j, k]], 0.0);
                        assert_eq!(solver.uz[[i, j, k]], 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn zero_gravity_skips_forcing_without_blowing_up() {
        let mut solver = tiny_solver(Vec3::zeros());
        for _ in 0..30 {
            solver.step();
        }
        assert!(solver.rho.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn fill_level_stays_in_unit_range() {
        let mut solver = tiny_solver(Vec3::new(0.0, 0.0, -1e-4));
        for _ in 0..15 {
            solver.step();
        }
        for &f in solver.fill_level.iter() {
            assert!((0.0..=1.0).contains(&f));
        }
    }
}
