//! Tracer particle advection: seeds `N` particles near the inlet, advances
//! them frame by frame through the solved velocity field, and slides them
//! along solid surfaces using the signed distance field rather than letting
//! them tunnel through walls between frames.

use crate::interp::trilinear_sample;
use crate::rng;
use crate::sdf as sdf_mod;
use crate::vector::{normalize_or_fallback, orthonormal_basis, Vec3};
use ndarray::{Array1, Array3, ArrayView3};
use rayon::prelude::*;

const VELOCITY_BLEND_OLD: f32 = 0.85;
const VELOCITY_BLEND_NEW: f32 = 0.15;
const SURFACE_SLIDE_RETAIN: f32 = 0.30; // keep 30% of the normal component
const COLLISION_REFLECT_FACTOR: f32 = 1.8;

/// Derived constants that scale with cell size, computed once per run
/// (SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Copy)]
pub struct AdvectionConstants {
    pub dx_mm: f32,
    pub emit_radius: f32,
    pub emit_speed: f32,
    pub velocity_scale: f32,
    pub gravity_accel: f32,
    pub terminal_speed_along_g: f32,
    pub surface_thickness: f32,
    pub surface_attract: f32,
    pub decay_distance: f32,
    pub particle_lifetime: u32,
    pub overall_speed_cap: f32,
}

impl AdvectionConstants {
    pub fn derive(dx_mm: f32, frames_total: u32) -> Self {
        Self {
            dx_mm,
            emit_radius: 8.0_f32.max(4.0 * dx_mm),
            emit_speed: 2.0 * dx_mm,
            velocity_scale: 150.0 * dx_mm,
            gravity_accel: 5.0 * dx_mm,
            terminal_speed_along_g: 15.0 * dx_mm,
            surface_thickness: 4.0 * dx_mm,
            surface_attract: 0.5 * dx_mm,
            decay_distance: 25.0 * dx_mm,
            particle_lifetime: ((1.5 * frames_total as f32).floor()) as u32,
            overall_speed_cap: 20.0 * dx_mm,
        }
    }

    fn respawn_age_threshold(&self) -> u32 {
        2 * self.particle_lifetime
    }
}

#[derive(Debug, Clone, Copy)]
struct Particle {
    pos: Vec3,
    vel: Vec3,
    age: u32,
    birth_frame: u32,
    respawn_count: u32,
}

/// Owns the flow field, SDF, domain geometry, and the particle state; runs
/// the full `(F, N, 3)` trajectory.
pub struct Advector<'a> {
    ux: ArrayView3<'a, f32>,
    uy: ArrayView3<'a, f32>,
    uz: ArrayView3<'a, f32>,
    sdf: ArrayView3<'a, f32>,
    origin: Vec3,
    spacing: (f32, f32, f32),
    domain_extent: Vec3,
    gravity_dir: Vec3,
    consts: AdvectionConstants,
    particles: Vec<Particle>,
    collision_count: u64,
    decay_count: u64,
}

impl<'a> Advector<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        x_coords: &'a Array1<f32>,
        y_coords: &'a Array1<f32>,
        z_coords: &'a Array1<f32>,
        ux: ArrayView3<'a, f32>,
        uy: ArrayView3<'a, f32>,
        uz: ArrayView3<'a, f32>,
        sdf: ArrayView3<'a, f32>,
        source_point_mm: Vec3,
        gravity_dir: Vec3,
        n_particles: usize,
        n_frames: u32,
    ) -> Self {
        let dx_avg = ((x_coords[1] - x_coords[0]) + (y_coords[1] - y_coords[0]) + (z_coords[1] - z_coords[0])) / 3.0;
        let spacing = (
            x_coords[1] - x_coords[0],
            y_coords[1] - y_coords[0],
            z_coords[1] - z_coords[0],
        );
        let origin = Vec3::new(x_coords[0], y_coords[0], z_coords[0]);
        let domain_extent = Vec3::new(
            x_coords[x_coords.len() - 1] - x_coords[0],
            y_coords[y_coords.len() - 1] - y_coords[0],
            z_coords[z_coords.len() - 1] - z_coords[0],
        );
        let consts = AdvectionConstants::derive(dx_avg, n_frames);

        let max_birth = ((0.75 * n_frames as f32).floor() as u32).max(1);
        let batch = rng::draw_emission_batch(n_particles, max_birth);
        let (e1, e2) = orthonormal_basis(gravity_dir);

        let particles: Vec<Particle> = (0..n_particles)
            .map(|i| {
                let (u, v) = batch.disk_offset[i];
                let offset = (e1 * u + e2 * v) * consts.emit_radius;
                Particle {
                    pos: source_point_mm + offset,
                    vel: gravity_dir * consts.emit_speed,
                    age: 0,
                    birth_frame: batch.birth_frame[i],
                    respawn_count: 0,
                }
            })
            .collect();

        Self {
            ux,
            uy,
            uz,
            sdf,
            origin,
            spacing,
            domain_extent,
            gravity_dir,
            consts,
            particles,
            collision_count: 0,
            decay_count: 0,
        }
    }

    fn to_index(&self, pos: Vec3) -> (f32, f32, f32) {
        (
            (pos.x - self.origin.x) / self.spacing.0,
            (pos.y - self.origin.y) / self.spacing.1,
            (pos.z - self.origin.z) / self.spacing.2,
        )
    }

    fn sample_velocity(&self, pos: Vec3) -> Vec3 {
        let (ix, iy, iz) = self.to_index(pos);
        Vec3::new(
            trilinear_sample(self.ux, ix, iy, iz, 0.0),
            trilinear_sample(self.uy, ix, iy, iz, 0.0),
            trilinear_sample(self.uz, ix, iy, iz, 0.0),
        )
    }

    fn sample_sdf(&self, pos: Vec3) -> f32 {
        let (ix, iy, iz) = self.to_index(pos);
        trilinear_sample(self.sdf, ix, iy, iz, -100.0)
    }

    fn surface_normal(&self, pos: Vec3) -> Vec3 {
        let h = 0.5 * self.consts.dx_mm;
        let gx = self.sample_sdf(pos + Vec3::new(h, 0.0, 0.0)) - self.sample_sdf(pos - Vec3::new(h, 0.0, 0.0));
        let gy = self.sample_sdf(pos + Vec3::new(0.0, h, 0.0)) - self.sample_sdf(pos - Vec3::new(0.0, h, 0.0));
        let gz = self.sample_sdf(pos + Vec3::new(0.0, 0.0, h)) - self.sample_sdf(pos - Vec3::new(0.0, 0.0, h));
        normalize_or_fallback(Vec3::new(gx, gy, gz), -self.gravity_dir)
    }

    fn out_of_domain(&self, pos: Vec3) -> bool {
        let lo = self.origin - self.domain_extent;
        let hi = self.origin + self.domain_extent * 2.0; // origin + extent + one more extent
        pos.x < lo.x || pos.x > hi.x || pos.y < lo.y || pos.y > hi.y || pos.z < lo.z || pos.z > hi.z
    }

    /// Run one born particle through steps 1-10 of the per-frame update,
    /// returning its state after the step (and whether it respawned, for
    /// counter bookkeeping at the call site).
    fn update_one(&self, p: &Particle) -> (Particle, bool, bool) {
        let c = &self.consts;
        let mut vel = self.sample_velocity(p.pos) * c.velocity_scale;
        vel = p.vel * VELOCITY_BLEND_OLD + vel * VELOCITY_BLEND_NEW;
        vel += self.gravity_dir * c.gravity_accel;

        let along_g = vel.dot(&self.gravity_dir);
        if along_g > c.terminal_speed_along_g {
            vel -= self.gravity_dir * (along_g - c.terminal_speed_along_g);
        }

        let mut collided = false;
        let sdf_here = self.sample_sdf(p.pos);
        if sdf_here > 0.0 && sdf_here < c.surface_thickness {
            let normal = self.surface_normal(p.pos);
            let normal_component = vel.dot(&normal);
            vel -= normal * (normal_component * (1.0 - SURFACE_SLIDE_RETAIN));
            vel -= normal * c.surface_attract;
        }
        if sdf_here < 0.0 {
            collided = true;
            let normal = self.surface_normal(p.pos);
            let push = (sdf_here.abs() + c.dx_mm) * normal;
            let pos = p.pos + push;
            let normal_component = vel.dot(&normal);
            vel -= normal * (COLLISION_REFLECT_FACTOR * normal_component);
            let speed = vel.norm();
            if speed > c.overall_speed_cap {
                vel = vel * (c.overall_speed_cap / speed);
            }
            let new_pos = pos + vel;
            let mut next = *p;
            next.pos = new_pos;
            next.vel = vel;
            let respawn = self.should_respawn(&next);
            next.age += 1;
            return (next, collided, respawn);
        }

        let speed = vel.norm();
        if speed > c.overall_speed_cap {
            vel = vel * (c.overall_speed_cap / speed);
        }

        let new_pos = p.pos + vel;
        let mut next = *p;
        next.pos = new_pos;
        next.vel = vel;
        let respawn = self.should_respawn(&next);
        next.age += 1;
        (next, collided, respawn)
    }

    fn should_respawn(&self, p: &Particle) -> bool {
        let c = &self.consts;
        if self.out_of_domain(p.pos) {
            return true;
        }
        let sdf_val = self.sample_sdf(p.pos);
        if sdf_val > c.decay_distance && p.vel.dot(&self.gravity_dir) <= 0.5 * c.gravity_accel {
            return true;
        }
        if p.age > c.respawn_age_threshold() {
            return true;
        }
        if sdf_val < -10.0 * c.dx_mm {
            return true;
        }
        false
    }

    fn respawn(&self, index: usize, p: &Particle, source_point_mm: Vec3) -> Particle {
        let respawn_count = p.respawn_count + 1;
        let (e1, e2) = orthonormal_basis(self.gravity_dir);
        let (u, v) = rng::respawn_offset(index, respawn_count);
        let offset = (e1 * u + e2 * v) * self.consts.emit_radius;
        Particle {
            pos: source_point_mm + offset,
            vel: self.gravity_dir * self.consts.emit_speed,
            age: 0,
            birth_frame: p.birth_frame,
            respawn_count,
        }
    }

    /// Run the full trajectory, returning the `(F, N, 3)` frame buffer and
    /// the final collision/decay counters.
    pub fn run(&mut self, n_frames: u32, source_point_mm: Vec3) -> (Array3<f32>, u64, u64) {
        let n = self.particles.len();
        let mut frames = Array3::<f32>::zeros((n_frames as usize, n, 3));

        for t in 0..n_frames {
            for (i, p) in self.particles.iter().enumerate() {
                frames[[t as usize, i, 0]] = p.pos.x;
                frames[[t as usize, i, 1]] = p.pos.y;
                frames[[t as usize, i, 2]] = p.pos.z;
            }

            let updates: Vec<Option<(Particle, bool, bool)>> = self
                .particles
                .par_iter()
                .map(|p| {
                    if t >= p.birth_frame {
                        Some(self.update_one(p))
                    } else {
                        None
                    }
                })
                .collect();

            for (i, update) in updates.into_iter().enumerate() {
                if let Some((mut next, collided, respawn)) = update {
                    if collided {
                        self.collision_count += 1;
                    }
                    if respawn {
                        next = self.respawn(i, &next, source_point_mm);
                        self.decay_count += 1;
                    }
                    self.particles[i] = next;
                }
            }
        }

        (frames, self.collision_count, self.decay_count)
    }
}

/// Build the signed distance field once per run and hand back a borrowable
/// view, matching how `Advector` is constructed against borrowed arrays.
pub fn build_sdf(solid: &Array3<bool>, spacing: (f32, f32, f32)) -> Array3<f32> {
    sdf_mod::signed_distance_field(solid, spacing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_field(nx: usize, ny: usize, nz: usize) -> (Array1<f32>, Array1<f32>, Array1<f32>) {
        (
            Array1::linspace(0.0, (nx - 1) as f32, nx),
            Array1::linspace(0.0, (ny - 1) as f32, ny),
            Array1::linspace(0.0, (nz - 1) as f32, nz),
        )
    }

    #[test]
    fn advection_runs_and_produces_finite_trajectory() {
        let (nx, ny, nz) = (12usize, 12, 12);
        let (x, y, z) = flat_field(nx, ny, nz);
        let ux = Array3::<f32>::zeros((nx, ny, nz));
        let uy = Array3::<f32>::zeros((nx, ny, nz));
        let uz = Array3::<f32>::from_elem((nx, ny, nz), -0.01);
        let mut solid = Array3::<bool>::from_elem((nx, ny, nz), false);
        for i in 0..nx {
            for j in 0..ny {
                solid[[i, j, 0]] = true;
            }
        }
        let sdf = build_sdf(&solid, (1.0, 1.0, 1.0));

        let mut adv = Advector::new(
            &x,
            &y,
            &z,
            ux.view(),
            uy.view(),
            uz.view(),
            sdf.view(),
            Vec3::new(5.0, 5.0, 5.0),
            Vec3::new(0.0, 0.0, -1.0),
            20,
            10,
        );
        let (frames, _collisions, _decays) = adv.run(10, Vec3::new(5.0, 5.0, 5.0));
        assert_eq!(frames.dim(), (10, 20, 3));
        for v in frames.iter() {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn unborn_particles_stay_pinned_at_source() {
        let (nx, ny, nz) = (8usize, 8, 8);
        let (x, y, z) = flat_field(nx, ny, nz);
        let ux = Array3::<f32>::zeros((nx, ny, nz));
        let uy = Array3::<f32>::zeros((nx, ny, nz));
        let uz = Array3::<f32>::zeros((nx, ny, nz));
        let solid = Array3::<bool>::from_elem((nx, ny, nz), false);
        let sdf = Array3::<f32>::from_elem((nx, ny, nz), 50.0);

        let mut adv = Advector::new(
            &x,
            &y,
            &z,
            ux.view(),
            uy.view(),
            uz.view(),
            sdf.view(),
            Vec3::new(4.0, 4.0, 4.0),
            Vec3::new(0.0, 0.0, -1.0),
            5,
            4,
        );
        for p in adv.particles.iter_mut() {
            p.birth_frame = 100;
        }
        let (frames, _, _) = adv.run(4, Vec3::new(4.0, 4.0, 4.0));
        for t in 1..4 {
            for n in 0..5 {
                for c in 0..3 {
                    assert_eq!(frames[[t, n, c]], frames[[0, n, c]]);
                }
            }
        }
    }
}
