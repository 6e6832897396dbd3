use glam::Vec3;

use crate::import::mesh::Mesh;

/// Per-vertex tangents aligned with the U texture direction.
///
/// Returns `None` unless the mesh has both normals and texture coordinates.
pub fn calculate_tangents(mesh: &Mesh) -> Option<Vec<Vec3>> {
    let count = mesh.positions.len();
    if mesh.normals.len() != count || mesh.tex_coords.len() != count || count == 0 {
        return None;
    }

    let mut tangents = vec![Vec3::ZERO; count];
    for face in &mesh.faces {
        let [a, b, c] = face.map(|v| v as usize);
        let edge1 = mesh.positions[b] - mesh.positions[a];
        let edge2 = mesh.positions[c] - mesh.positions[a];
        let delta_uv1 = mesh.tex_coords[b] - mesh.tex_coords[a];
        let delta_uv2 = mesh.tex_coords[c] - mesh.tex_coords[a];

        let denominator = delta_uv1.x * delta_uv2.y - delta_uv2.x * delta_uv1.y;
        let tangent = if denominator.abs() < f32::EPSILON {
            Vec3::X
        } else {
            (edge1 * delta_uv2.y - edge2 * delta_uv1.y) / denominator
        };
        for v in [a, b, c] {
            tangents[v] += tangent;
        }
    }

    for (tangent, &normal) in tangents.iter_mut().zip(&mesh.normals) {
        // Gram-Schmidt against the normal.
        let t = (*tangent - normal * normal.dot(*tangent)).normalize_or_zero();
        *tangent = if t == Vec3::ZERO { normal.any_orthonormal_vector() } else { t };
    }
    Some(tangents)
}
