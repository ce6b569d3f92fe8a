//! D3Q19 lattice constants: discrete velocities, weights, opposite-direction
//! table, and the BGK equilibrium distribution.

/// Number of discrete velocity directions in the D3Q19 lattice.
pub const Q: usize = 19;

/// Discrete velocity vectors, integer lattice units. Index 0 is the rest
/// particle, 1..=6 are axis-aligned, 7..=18 are face-diagonal.
pub const C: [[i32; 3]; Q] = [
    [0, 0, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0],
    [-1, 1, 0],
    [1, -1, 0],
    [-1, -1, 0],
    [1, 0, 1],
    [-1, 0, 1],
    [1, 0, -1],
    [-1, 0, -1],
    [0, 1, 1],
    [0, -1, 1],
    [0, 1, -1],
    [0, -1, -1],
];

/// Per-direction weights: 1/3 rest, 1/18 axial, 1/36 diagonal.
pub const W: [f32; Q] = [
    1.0 / 3.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
];

/// `OPP[q]` is the direction index pointing the opposite way from `q`.
pub const OPP: [usize; Q] = [
    0, 2, 1, 4, 3, 6, 5, 10, 9, 8, 7, 14, 13, 12, 11, 18, 17, 16, 15,
];

/// Lattice sound speed squared, `1/3` for D3Q19.
pub const CS2: f32 = 1.0 / 3.0;

/// BGK equilibrium distribution for direction `q` given density `rho` and
/// velocity `(ux, uy, uz)`.
#[inline]
pub fn equilibrium(q: usize, rho: f32, ux: f32, uy: f32, uz: f32) -> f32 {
    let cx = C[q][0] as f32;
    let cy = C[q][1] as f32;
    let cz = C[q][2] as f32;
    let cu = cx * ux + cy * uy + cz * uz;
    let u_sq = ux * ux + uy * uy + uz * uz;
    W[q] * rho * (1.0 + 3.0 * cu + 4.5 * cu * cu - 1.5 * u_sq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let sum: f32 = W.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "weights sum to {sum}");
    }

    #[test]
    fn opposite_table_is_involution() {
        for q in 0..Q {
            assert_eq!(OPP[OPP[q]], q);
            let c = C[q];
            let co = C[OPP[q]];
            assert_eq!([co[0], co[1], co[2]], [-c[0], -c[1], -c[2]]);
        }
    }

    #[test]
    fn equilibrium_at_rest_matches_weight() {
        for q in 0..Q {
            let feq = equilibrium(q, 1.0, 0.0, 0.0, 0.0);
            assert!((feq - W[q]).abs() < 1e-7);
        }
    }

    #[test]
    fn equilibrium_conserves_density_at_low_speed() {
        let rho = 1.2_f32;
        let sum: f32 = (0..Q).map(|q| equilibrium(q, rho, 0.01, -0.02, 0.005)).sum();
        assert!((sum - rho).abs() < 1e-4, "sum={sum} rho={rho}");
    }
}
