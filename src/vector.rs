//! Shared 3-vector type. A thin alias over `nalgebra::Vector3<f32>` plus a
//! couple of helpers (safe normalize, stable orthonormal basis) used across
//! voxelization, the solver's forcing term, and advection.

use nalgebra::Vector3;

pub type Vec3 = Vector3<f32>;

/// Normalize `v`, falling back to `(0, 0, -1)` when its norm is too small to
/// trust (SPEC_FULL.md §3: gravity fallback direction).
pub fn normalize_or_fallback(v: Vec3, fallback: Vec3) -> Vec3 {
    let n = v.norm();
    if n < 1e-12 {
        fallback
    } else {
        v / n
    }
}

/// Build two unit vectors orthogonal to `axis` and to each other, stable for
/// any unit `axis` (including axis-aligned ones). Used to orient the emission
/// disk perpendicular to gravity.
pub fn orthonormal_basis(axis: Vec3) -> (Vec3, Vec3) {
    // Pick whichever world axis is least parallel to `axis` to cross against,
    // avoiding the degenerate near-parallel case.
    let helper = if axis.x.abs() < 0.9 {
        Vec3::new(1.0, 0.0, 0.0)
    } else {
        Vec3::new(0.0, 1.0, 0.0)
    };
    let e1 = axis.cross(&helper).normalize();
    let e2 = axis.cross(&e1).normalize();
    (e1, e2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_used_below_threshold() {
        let v = normalize_or_fallback(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(v, Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn normalize_preserves_direction() {
        let v = normalize_or_fallback(Vec3::new(3.0, 4.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
        assert!((v.norm() - 1.0).abs() < 1e-6);
        assert!((v.x - 0.6).abs() < 1e-6);
        assert!((v.y - 0.8).abs() < 1e-6);
    }

    #[test]
    fn orthonormal_basis_is_orthogonal_to_axis_and_itself() {
        for axis in [
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.577, 0.577, 0.577),
        ] {
            let axis = axis.normalize();
            let (e1, e2) = orthonormal_basis(axis);
            assert!(e1.dot(&axis).abs() < 1e-4);
            assert!(e2.dot(&axis).abs() < 1e-4);
            assert!(e1.dot(&e2).abs() < 1e-4);
            assert!((e1.norm() - 1.0).abs() < 1e-4);
            assert!((e2.norm() - 1.0).abs() < 1e-4);
        }
    }
}
