//! Generic trilinear interpolation over a regular 3-D grid. One primitive
//! shared by velocity-component sampling (advection) and SDF sampling
//! (surface sliding/reflection), parameterized by an out-of-bounds fill value
//! so callers don't each re-derive clamping behavior.

use ndarray::ArrayView3;

/// Sample `field` at continuous grid-index coordinates `(ix, iy, iz)` (in
/// cell-index units, not physical units — callers convert from mm via their
/// own coordinate vectors first). Indices outside `[0, n-1]` on any axis
/// contribute `fill` instead of a clamped edge value, matching the sampler's
/// use for SDF queries past the domain boundary.
pub fn trilinear_sample(field: ArrayView3<f32>, ix: f32, iy: f32, iz: f32, fill: f32) -> f32 {
    let (nx, ny, nz) = field.dim();

    let at = |x: i64, y: i64, z: i64| -> f32 {
        if x < 0 || y < 0 || z < 0 || x as usize >= nx || y as usize >= ny || z as usize >= nz {
            fill
        } else {
            field[[x as usize, y as usize, z as usize]]
        }
    };

    let x0 = ix.floor();
    let y0 = iy.floor();
    let z0 = iz.floor();
    let tx = ix - x0;
    let ty = iy - y0;
    let tz = iz - z0;
    let (x0, y0, z0) = (x0 as i64, y0 as i64, z0 as i64);

    let c000 = at(x0, y0, z0);
    let c100 = at(x0 + 1, y0, z0);
    let c010 = at(x0, y0 + 1, z0);
    let c110 = at(x0 + 1, y0 + 1, z0);
    let c001 = at(x0, y0, z0 + 1);
    let c101 = at(x0 + 1, y0, z0 + 1);
    let c011 = at(x0, y0 + 1, z0 + 1);
    let c111 = at(x0 + 1, y0 + 1, z0 + 1);

    let c00 = c000 * (1.0 - tx) + c100 * tx;
    let c10 = c010 * (1.0 - tx) + c110 * tx;
    let c01 = c001 * (1.0 - tx) + c101 * tx;
    let c11 = c011 * (1.0 - tx) + c111 * tx;

    let c0 = c00 * (1.0 - ty) + c10 * ty;
    let c1 = c01 * (1.0 - ty) + c11 * ty;

    c0 * (1.0 - tz) + c1 * tz
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn exact_at_grid_corners() {
        let mut field = Array3::<f32>::zeros((2, 2, 2));
        field[[0, 0, 0]] = 1.0;
        field[[1, 0, 0]] = 2.0;
        field[[0, 1, 0]] = 3.0;
        field[[1, 1, 1]] = 9.0;
        assert_eq!(trilinear_sample(field.view(), 0.0, 0.0, 0.0, -1.0), 1.0);
        assert_eq!(trilinear_sample(field.view(), 1.0, 0.0, 0.0, -1.0), 2.0);
        assert_eq!(trilinear_sample(field.view(), 1.0, 1.0, 1.0, -1.0), 9.0);
    }

    #[test]
    fn interpolates_linearly_along_one_axis() {
        let mut field = Array3::<f32>::zeros((2, 1, 1));
        field[[0, 0, 0]] = 0.0;
        field[[1, 0, 0]] = 10.0;
        let mid = trilinear_sample(field.view(), 0.5, 0.0, 0.0, -1.0);
        assert!((mid - 5.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_bounds_uses_fill_value() {
        let field = Array3::<f32>::from_elem((2, 2, 2), 7.0);
        // x0=-1 (fill) blended 50/50 with x0+1=0 (7.0).
        let v = trilinear_sample(field.view(), -0.5, 0.0, 0.0, -3.0);
        assert!((v - 2.0).abs() < 1e-6);
        let v2 = trilinear_sample(field.view(), -5.0, -5.0, -5.0, -3.0);
        assert!((v2 - (-3.0)).abs() < 1e-6);
    }
}
