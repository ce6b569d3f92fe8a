//! Triangle mesh representation, a minimal binary-STL reader, and the
//! point-in-closed-mesh test used by the voxelizer.
//!
//! The voxelizer only needs two things from a mesh source (SPEC_FULL.md
//! §3/§9-E): a triangle soup of vertices, and the ability to test whether an
//! arbitrary point lies inside the closed surface. The STL reader is the
//! crate's bundled way of producing that triangle soup from a file; any other
//! loader that builds a `TriangleMesh` is an equally valid input.

use crate::error::{Result, SimError};
use crate::vector::Vec3;
use std::io::Read;
use std::path::Path;

/// Axis-aligned bounding box, in the mesh's native units (millimetres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x0: f32,
    pub x1: f32,
    pub y0: f32,
    pub y1: f32,
    pub z0: f32,
    pub z1: f32,
}

impl Bounds {
    pub fn center(&self) -> Vec3 {
        Vec3::new(
            0.5 * (self.x0 + self.x1),
            0.5 * (self.y0 + self.y1),
            0.5 * (self.z0 + self.z1),
        )
    }

    pub fn size(&self) -> Vec3 {
        Vec3::new(self.x1 - self.x0, self.y1 - self.y0, self.z1 - self.z0)
    }

    pub fn max_dim(&self) -> f32 {
        let s = self.size();
        s.x.max(s.y).max(s.z)
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.x0 && p.x <= self.x1 && p.y >= self.y0 && p.y <= self.y1 && p.z >= self.z0 && p.z <= self.z1
    }
}

/// A triangle soup (three vertices per triangle, no shared-index buffer) plus
/// the bounding-volume hierarchy built over it.
#[derive(Debug, Clone)]
pub struct TriangleMesh {
    pub triangles: Vec<[Vec3; 3]>,
    pub bounds: Bounds,
    bvh: TriangleBvh,
}

/// Fixed ray directions retried in turn when a cast lands within epsilon of a
/// triangle edge or vertex and the even-odd count becomes untrustworthy.
/// Arbitrary but fixed, and none axis-aligned or mutually parallel.
const RETRY_DIRS: [Vec3; 4] = [
    Vec3::new(0.9040102, 0.31622776, 0.0),
    Vec3::new(0.27216553, 0.9486833, 0.031622776),
    Vec3::new(0.0032232918, 0.70710677, 0.70710677),
    Vec3::new(0.57735026, 0.57735026, 0.57735026),
];

impl TriangleMesh {
    /// Build a mesh from raw triangles, computing the bounding box and BVH.
    pub fn from_triangles(triangles: Vec<[Vec3; 3]>) -> Result<Self> {
        if triangles.is_empty() {
            return Err(SimError::BadInput("mesh has zero triangles".into()));
        }
        let mut x0 = f32::INFINITY;
        let mut x1 = f32::NEG_INFINITY;
        let mut y0 = f32::INFINITY;
        let mut y1 = f32::NEG_INFINITY;
        let mut z0 = f32::INFINITY;
        let mut z1 = f32::NEG_INFINITY;
        for tri in &triangles {
            for v in tri {
                x0 = x0.min(v.x);
                x1 = x1.max(v.x);
                y0 = y0.min(v.y);
                y1 = y1.max(v.y);
                z0 = z0.min(v.z);
                z1 = z1.max(v.z);
            }
        }
        let bounds = Bounds { x0, x1, y0, y1, z0, z1 };
        if bounds.max_dim() < 1e-9 {
            return Err(SimError::BadInput("mesh bounding box has zero volume".into()));
        }
        let bvh = TriangleBvh::build(&triangles);
        Ok(Self { triangles, bounds, bvh })
    }

    /// All mesh vertices, for outlet projection (one entry per triangle
    /// corner; duplicates across shared edges are harmless for a percentile
    /// computation).
    pub fn vertices(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.triangles.iter().flat_map(|t| t.iter().copied())
    }

    /// Even-odd ray-casting point-in-closed-mesh test (SPEC_FULL.md §4.1,
    /// §9-D). Casts along a fixed direction and retries with a different
    /// fixed direction whenever the cast grazes a triangle edge closely
    /// enough that the parity can't be trusted.
    pub fn contains_point(&self, p: Vec3) -> bool {
        for dir in RETRY_DIRS {
            if let Some(inside) = self.bvh.ray_parity(&self.triangles, p, dir) {
                return inside;
            }
        }
        // Every retry direction was ambiguous; this only happens on
        // pathological (self-intersecting or non-manifold) input.
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    fn empty() -> Self {
        Self {
            min: Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    fn grow(&mut self, p: Vec3) {
        self.min = self.min.zip_map(&p, f32::min);
        self.max = self.max.zip_map(&p, f32::max);
    }

    fn union(&mut self, other: &Aabb) {
        self.min = self.min.zip_map(&other.min, f32::min);
        self.max = self.max.zip_map(&other.max, f32::max);
    }

    fn centroid(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Slab test against the ray's positive half-line; we only need hit/miss,
    /// not the intersection distance.
    fn hit_ray(&self, origin: Vec3, dir: Vec3) -> bool {
        let mut tmin = 0.0_f32;
        let mut tmax = f32::INFINITY;
        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            let lo = self.min[axis];
            let hi = self.max[axis];
            if d.abs() < 1e-12 {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            tmin = tmin.max(t0);
            tmax = tmax.min(t1);
            if tmin > tmax {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
enum BvhNode {
    Leaf { bbox: Aabb, start: u32, count: u32 },
    Internal { bbox: Aabb, left: u32, right: u32 },
}

/// Bounding-volume hierarchy over a mesh's triangles, used to accelerate ray
/// casting during the point-in-mesh test.
#[derive(Debug, Clone)]
struct TriangleBvh {
    nodes: Vec<BvhNode>,
    tri_indices: Vec<u32>,
}

impl TriangleBvh {
    const LEAF_SIZE: usize = 4;

    fn build(triangles: &[[Vec3; 3]]) -> Self {
        let mut entries: Vec<(u32, Aabb)> = triangles
            .iter()
            .enumerate()
            .map(|(i, tri)| {
                let mut bbox = Aabb::empty();
                for v in tri {
                    bbox.grow(*v);
                }
                (i as u32, bbox)
            })
            .collect();

        let mut nodes = Vec::new();
        let mut tri_indices = Vec::with_capacity(triangles.len());
        Self::build_recursive(&mut entries, &mut nodes, &mut tri_indices);
        Self { nodes, tri_indices }
    }

    fn build_recursive(entries: &mut [(u32, Aabb)], nodes: &mut Vec<BvhNode>, tri_indices: &mut Vec<u32>) -> u32 {
        let mut bbox = Aabb::empty();
        for (_, b) in entries.iter() {
            bbox.union(b);
        }

        if entries.len() <= Self::LEAF_SIZE {
            let start = tri_indices.len() as u32;
            for (idx, _) in entries.iter() {
                tri_indices.push(*idx);
            }
            nodes.push(BvhNode::Leaf {
                bbox,
                start,
                count: entries.len() as u32,
            });
            return (nodes.len() - 1) as u32;
        }

        let extent = bbox.max - bbox.min;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        entries.sort_by(|a, b| {
            a.1.centroid()[axis]
                .partial_cmp(&b.1.centroid()[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mid = entries.len() / 2;
        let (left_entries, right_entries) = entries.split_at_mut(mid);

        let placeholder = nodes.len();
        nodes.push(BvhNode::Leaf { bbox, start: 0, count: 0 });

        let left = Self::build_recursive(left_entries, nodes, tri_indices);
        let right = Self::build_recursive(right_entries, nodes, tri_indices);
        nodes[placeholder] = BvhNode::Internal { bbox, left, right };
        placeholder as u32
    }

    /// Count ray-triangle intersections with `t > 0` and return even/odd
    /// parity (`true` = inside), or `None` if any hit grazed a triangle edge
    /// closely enough that the count can't be trusted.
    fn ray_parity(&self, triangles: &[[Vec3; 3]], origin: Vec3, dir: Vec3) -> Option<bool> {
        if self.nodes.is_empty() {
            return Some(false);
        }
        let mut count = 0usize;
        let mut ambiguous = false;
        let mut stack = vec![self.nodes.len() as u32 - 1];
        while let Some(idx) = stack.pop() {
            match &self.nodes[idx as usize] {
                BvhNode::Leaf { bbox, start, count: c } => {
                    if !bbox.hit_ray(origin, dir) {
                        continue;
                    }
                    for i in *start..(*start + *c) {
                        let tri_idx = self.tri_indices[i as usize] as usize;
                        let mut grazing = false;
                        if ray_triangle(origin, dir, &triangles[tri_idx], &mut grazing).is_some() {
                            count += 1;
                        }
                        if grazing {
                            ambiguous = true;
                        }
                    }
                }
                BvhNode::Internal { bbox, left, right } => {
                    if !bbox.hit_ray(origin, dir) {
                        continue;
                    }
                    stack.push(*left);
                    stack.push(*right);
                }
            }
        }
        if ambiguous {
            None
        } else {
            Some(count % 2 == 1)
        }
    }
}

/// Möller–Trumbore ray-triangle intersection, returning the hit parameter `t`
/// for `t > epsilon`, or `None`. Sets `*grazing` when the hit lands within
/// `EDGE_EPS` of a triangle edge or vertex, where a perturbation of `dir`
/// could flip which side of the edge the ray is judged to pass.
fn ray_triangle(origin: Vec3, dir: Vec3, tri: &[Vec3; 3], grazing: &mut bool) -> Option<f32> {
    const EPS: f32 = 1e-7;
    const EDGE_EPS: f32 = 1e-4;
    let edge1 = tri[1] - tri[0];
    let edge2 = tri[2] - tri[0];
    let pvec = dir.cross(&edge2);
    let det = edge1.dot(&pvec);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - tri[0];
    let u = tvec.dot(&pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(&edge1);
    let v = dir.dot(&qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    if u < EDGE_EPS || v < EDGE_EPS || (u + v) > 1.0 - EDGE_EPS {
        *grazing = true;
    }
    let t = edge2.dot(&qvec) * inv_det;
    if t > EPS {
        Some(t)
    } else {
        None
    }
}

/// Read a binary STL file into a [`TriangleMesh`]. Supports the common
/// little-endian binary layout: an 80-byte header, a `u32` triangle count,
/// then 50 bytes per triangle (12-byte normal, three 12-byte vertices, a
/// 2-byte attribute count). The normal and attribute bytes are ignored; the
/// bounding box and BVH are derived from the vertices alone.
pub fn load_binary_stl(path: impl AsRef<Path>) -> Result<TriangleMesh> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    if buf.len() < 84 {
        return Err(SimError::BadInput("STL file too short to contain a header".into()));
    }
    let tri_count = u32::from_le_bytes(buf[80..84].try_into().unwrap()) as usize;
    let expected_len = 84 + tri_count * 50;
    if buf.len() < expected_len {
        return Err(SimError::BadInput(format!(
            "STL file truncated: expected {expected_len} bytes for {tri_count} triangles, got {}",
            buf.len()
        )));
    }

    let mut triangles = Vec::with_capacity(tri_count);
    let mut offset = 84;
    for _ in 0..tri_count {
        offset += 12; // normal
        let mut verts = [Vec3::zeros(); 3];
        for v in verts.iter_mut() {
            let x = f32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
            let y = f32::from_le_bytes(buf[offset + 4..offset + 8].try_into().unwrap());
            let z = f32::from_le_bytes(buf[offset + 8..offset + 12].try_into().unwrap());
            *v = Vec3::new(x, y, z);
            offset += 12;
        }
        offset += 2; // attribute byte count
        triangles.push(verts);
    }

    TriangleMesh::from_triangles(triangles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> TriangleMesh {
        let c = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
        let faces: [[Vec3; 4]; 6] = [
            [c(0., 0., 0.), c(1., 0., 0.), c(1., 1., 0.), c(0., 1., 0.)],
            [c(0., 0., 1.), c(1., 0., 1.), c(1., 1., 1.), c(0., 1., 1.)],
            [c(0., 0., 0.), c(1., 0., 0.), c(1., 0., 1.), c(0., 0., 1.)],
            [c(0., 1., 0.), c(1., 1., 0.), c(1., 1., 1.), c(0., 1., 1.)],
            [c(0., 0., 0.), c(0., 1., 0.), c(0., 1., 1.), c(0., 0., 1.)],
            [c(1., 0., 0.), c(1., 1., 0.), c(1., 1., 1.), c(1., 0., 1.)],
        ];
        let mut tris = Vec::new();
        for quad in faces {
            tris.push([quad[0], quad[1], quad[2]]);
            tris.push([quad[0], quad[2], quad[3]]);
        }
        TriangleMesh::from_triangles(tris).unwrap()
    }

    #[test]
    fn bounds_match_cube_extent() {
        let mesh = unit_cube();
        assert!((mesh.bounds.x0 - 0.0).abs() < 1e-6);
        assert!((mesh.bounds.x1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn point_inside_cube_is_contained() {
        let mesh = unit_cube();
        assert!(mesh.contains_point(Vec3::new(0.5, 0.5, 0.5)));
    }

    #[test]
    fn point_outside_cube_is_not_contained() {
        let mesh = unit_cube();
        assert!(!mesh.contains_point(Vec3::new(2.0, 2.0, 2.0)));
        assert!(!mesh.contains_point(Vec3::new(-0.5, 0.5, 0.5)));
    }

    #[test]
    fn empty_triangle_list_is_bad_input() {
        let err = TriangleMesh::from_triangles(Vec::new()).unwrap_err();
        assert!(matches!(err, SimError::BadInput(_)));
    }

    #[test]
    fn stl_roundtrip_unit_cube() {
        let mesh = unit_cube();
        let path = std::env::temp_dir().join(format!("flume_lbm_test_cube_{}.stl", std::process::id()));
        write_binary_stl(&path, &mesh.triangles).unwrap();
        let loaded = load_binary_stl(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.triangles.len(), mesh.triangles.len());
        assert!(loaded.contains_point(Vec3::new(0.5, 0.5, 0.5)));
        assert!(!loaded.contains_point(Vec3::new(5.0, 5.0, 5.0)));
    }

    fn write_binary_stl(path: &Path, triangles: &[[Vec3; 3]]) -> std::io::Result<()> {
        use std::io::Write;
        let mut f = std::fs::File::create(path)?;
        f.write_all(&[0u8; 80])?;
        f.write_all(&(triangles.len() as u32).to_le_bytes())?;
        for tri in triangles {
            f.write_all(&[0u8; 12])?;
            for v in tri {
                f.write_all(&v.x.to_le_bytes())?;
                f.write_all(&v.y.to_le_bytes())?;
                f.write_all(&v.z.to_le_bytes())?;
            }
            f.write_all(&[0u8; 2])?;
        }
        Ok(())
    }
}
