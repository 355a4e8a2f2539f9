// SPDX-License-Identifier: CEPL-1.0
use crate::LoadError;
use prism_math::{GeometryData, Vertex};
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, warn};

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

/// Load an OBJ file as a flat triangle list (one vertex per index, sequential indices).
pub fn load_obj(path: impl AsRef<Path>) -> Result<GeometryData, LoadError> {
    let path = path.as_ref();
    let (models, materials) = tobj::load_obj(path, &load_options())?;
    if let Err(e) = materials {
        // materials are not used by the PBR pipeline
        debug!("obj {}: ignoring material library: {e}", path.display());
    }
    let geo = flatten(&models)?;
    debug!(
        "obj {}: {} models, {} vertices",
        path.display(),
        models.len(),
        geo.vertices.len()
    );
    Ok(geo)
}

pub fn load_obj_from_reader<R: BufRead>(reader: &mut R) -> Result<GeometryData, LoadError> {
    let (models, _) = tobj::load_obj_buf(reader, &load_options(), |_| {
        Ok(Default::default())
    })?;
    flatten(&models)
}

fn flatten(models: &[tobj::Model]) -> Result<GeometryData, LoadError> {
    let mut vertices = Vec::new();
    for model in models {
        let mesh = &model.mesh;
        let has_normals = !mesh.normals.is_empty();
        let has_uvs = !mesh.texcoords.is_empty();
        if !has_normals {
            warn!("obj model '{}' has no normals", model.name);
        }
        vertices.reserve(mesh.indices.len());
        for &index in &mesh.indices {
            let i = index as usize;
            let position = [
                mesh.positions[3 * i],
                mesh.positions[3 * i + 1],
                mesh.positions[3 * i + 2],
            ];
            let normal = if has_normals {
                [
                    mesh.normals[3 * i],
                    mesh.normals[3 * i + 1],
                    mesh.normals[3 * i + 2],
                ]
            } else {
                [0.0; 3]
            };
            let uv = if has_uvs {
                [mesh.texcoords[2 * i], mesh.texcoords[2 * i + 1]]
            } else {
                [0.0; 2]
            };
            vertices.push(Vertex {
                position,
                normal,
                uv,
            });
        }
    }
    if vertices.is_empty() {
        return Err(LoadError::EmptyModel);
    }
    Ok(GeometryData::from_vertices(vertices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD: &str = "\
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn quad_is_triangulated_and_flattened() {
        let geo = load_obj_from_reader(&mut Cursor::new(QUAD)).expect("load");
        assert_eq!(geo.vertices.len(), 6);
        assert_eq!(geo.indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(geo.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
        assert_eq!(geo.vertices[0].position, [0.0, 0.0, 0.0]);
        assert_eq!(geo.vertices[1].uv, [1.0, 0.0]);
    }

    #[test]
    fn missing_attributes_default_to_zero() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let geo = load_obj_from_reader(&mut Cursor::new(src)).expect("load");
        assert_eq!(geo.vertices.len(), 3);
        assert!(geo.vertices.iter().all(|v| v.normal == [0.0; 3] && v.uv == [0.0; 2]));
    }

    #[test]
    fn empty_obj_is_an_error() {
        let err = load_obj_from_reader(&mut Cursor::new("# nothing\n"));
        assert!(matches!(err, Err(LoadError::EmptyModel)));
    }

    #[test]
    fn missing_file_reports_obj_error() {
        let err = load_obj("does/not/exist.obj");
        assert!(matches!(err, Err(LoadError::Obj(_))));
    }
}
