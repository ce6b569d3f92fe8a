//! Writes the simulation result as a zip-compressed `.npz` archive, readable
//! by any numpy-compatible consumer on the visualization side. Written
//! atomically: the archive is assembled at a temp path and renamed into
//! place only once complete, so a crash or early exit never leaves a
//! truncated file at the requested output path.

use crate::error::{Result, SimError};
use ndarray::{Array1, Array3};
use ndarray_npy::NpzWriter;
use std::fs::File;
use std::path::Path;

fn npz_err(e: impl std::error::Error) -> SimError {
    SimError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// Named arrays written to the artifact, matching the keys a downstream
/// `numpy.load` consumer expects.
pub struct Artifact<'a> {
    pub x_coords: &'a Array1<f32>,
    pub y_coords: &'a Array1<f32>,
    pub z_coords: &'a Array1<f32>,
    pub frames: &'a Array3<f32>,
    pub solid: &'a Array3<bool>,
    pub fill_level: &'a Array3<f32>,
}

/// Write `artifact` to `out_path` as a compressed `.npz` archive.
pub fn write_artifact(artifact: &Artifact, out_path: impl AsRef<Path>) -> Result<()> {
    let out_path = out_path.as_ref();
    let tmp_path = out_path.with_extension("npz.tmp");

    {
        let file = File::create(&tmp_path)?;
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array("x_coords", artifact.x_coords).map_err(npz_err)?;
        npz.add_array("y_coords", artifact.y_coords).map_err(npz_err)?;
        npz.add_array("z_coords", artifact.z_coords).map_err(npz_err)?;
        npz.add_array("frames", artifact.frames).map_err(npz_err)?;
        let solid_u8 = artifact.solid.mapv(|s| if s { 1u8 } else { 0u8 });
        npz.add_array("solid", &solid_u8).map_err(npz_err)?;
        npz.add_array("fill_level", artifact.fill_level).map_err(npz_err)?;
        npz.finish().map_err(npz_err)?;
    }

    std::fs::rename(&tmp_path, out_path)?;
    Ok(())
}
