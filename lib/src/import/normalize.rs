//! Post-passes that turn raw meshes into render-ready ones.

use glam::Vec3;

use crate::import::mesh::{BoneInfluence, DuplicationIndices, Material, Mesh};

/// Rebuilds the mesh so every vertex has exactly one normal.
///
/// A vertex referenced with several normals is duplicated once per extra
/// normal. Duplicates of a vertex are chained, so a later corner reuses any
/// copy that already carries its normal. Without normals only the vertex
/// source table is set up.
pub fn match_face_lists(mesh: &mut Mesh) {
    let num_original = mesh.positions.len();
    mesh.vertex_source = (0..num_original as u32).collect();
    if mesh.normals.is_empty() || mesh.normal_faces.len() != mesh.faces.len() {
        mesh.normals.clear();
        mesh.normal_faces.clear();
        return;
    }

    let mut assigned: Vec<Option<u32>> = vec![None; num_original];
    let mut next_dup: Vec<Option<u32>> = vec![None; num_original];
    let normal_faces = std::mem::take(&mut mesh.normal_faces);
    for (face, normal_face) in mesh.faces.iter_mut().zip(&normal_faces) {
        for (vertex, &normal) in face.iter_mut().zip(normal_face) {
            let mut current = *vertex as usize;
            loop {
                match assigned[current] {
                    None => {
                        assigned[current] = Some(normal);
                        break;
                    }
                    Some(n) if n == normal => break,
                    Some(_) => {}
                }
                if let Some(next) = next_dup[current] {
                    current = next as usize;
                    continue;
                }
                let copy = mesh.positions.len();
                mesh.positions.push(mesh.positions[current]);
                if !mesh.tex_coords.is_empty() {
                    mesh.tex_coords.push(mesh.tex_coords[current]);
                }
                if !mesh.colors.is_empty() {
                    mesh.colors.push(mesh.colors[current]);
                }
                if let Some(dup) = &mut mesh.duplication {
                    dup.indices.push(dup.indices[current]);
                }
                mesh.vertex_source.push(mesh.vertex_source[current]);
                assigned.push(Some(normal));
                next_dup.push(None);
                next_dup[current] = Some(copy as u32);
                current = copy;
                break;
            }
            *vertex = current as u32;
        }
    }

    let normals: Vec<Vec3> = assigned
        .iter()
        .map(|n| n.map_or(Vec3::ZERO, |n| mesh.normals[n as usize]))
        .collect();
    mesh.normals = normals;
    if num_original != mesh.positions.len() {
        log::debug!(
            "Mesh '{}': {} vertices duplicated to match normals",
            mesh.name,
            mesh.positions.len() - num_original
        );
    }
}

/// Deduplicates every mesh's materials into one table and fills each mesh's
/// local to global map.
pub fn make_global_material_list(meshes: &mut [Mesh]) -> Vec<Material> {
    let mut global: Vec<Material> = Vec::new();
    for mesh in meshes.iter_mut() {
        mesh.material_map = mesh
            .materials
            .iter()
            .map(|material| match global.iter().position(|m| m == material) {
                Some(index) => index as u32,
                None => {
                    global.push(material.clone());
                    (global.len() - 1) as u32
                }
            })
            .collect();
    }
    global
}

/// Inserts a (weight, frame) pair keeping the slots in descending order.
/// The smallest slot falls off the end; a weight no larger than every slot
/// is dropped.
pub fn add_bone_influence(influence: &mut BoneInfluence, weight: f32, frame: u32) {
    let Some(slot) = influence.weights.iter().position(|&w| w < weight) else {
        return;
    };
    for i in (slot + 1..4).rev() {
        influence.weights[i] = influence.weights[i - 1];
        influence.frames[i] = influence.frames[i - 1];
    }
    influence.weights[slot] = weight;
    influence.frames[slot] = frame;
}

/// Accumulates the bones of a mesh into per-vertex influences. Bone frames
/// must already be resolved.
pub fn compute_bone_influences(mesh: &mut Mesh) {
    if mesh.bones.is_empty() {
        mesh.influences.clear();
        return;
    }
    let mut influences = vec![BoneInfluence::default(); mesh.positions.len()];
    for bone in &mesh.bones {
        for &(vertex, weight) in &bone.weights {
            add_bone_influence(&mut influences[vertex as usize], weight, bone.frame as u32);
        }
    }
    for (vertex, influence) in influences.iter_mut().enumerate() {
        if mesh.vertex_source[vertex] as usize != vertex {
            continue;
        }
        let total: f32 = influence.weights.iter().sum();
        if total > 0.0 {
            for w in &mut influence.weights {
                *w /= total;
            }
        } else {
            *influence =
                BoneInfluence { weights: [1.0, 0.0, 0.0, 0.0], frames: [mesh.frame as u32, 0, 0, 0] };
        }
    }
    // Duplicates always follow their source.
    for vertex in 0..influences.len() {
        let source = mesh.vertex_source[vertex] as usize;
        if source != vertex {
            influences[vertex] = influences[source];
        }
    }
    mesh.influences = influences;
}

/// Splits every mesh into one mesh per used material, each with its own
/// compacted vertex set. Meshes left without faces are dropped.
pub fn split_meshes(meshes: Vec<Mesh>) -> Vec<Mesh> {
    let mut out = Vec::new();
    for mesh in meshes {
        for material in 0..mesh.materials.len() {
            if let Some(split) = extract_material(&mesh, material as u32) {
                out.push(split);
            }
        }
    }
    out
}

fn extract_material(mesh: &Mesh, material: u32) -> Option<Mesh> {
    let mut remap: Vec<Option<u32>> = vec![None; mesh.positions.len()];
    let mut vertices: Vec<u32> = Vec::new();
    let mut faces = Vec::new();
    for (face, _) in mesh.faces.iter().zip(&mesh.face_materials).filter(|(_, &m)| m == material) {
        faces.push(face.map(|v| {
            *remap[v as usize].get_or_insert_with(|| {
                vertices.push(v);
                (vertices.len() - 1) as u32
            })
        }));
    }
    if faces.is_empty() {
        return None;
    }

    fn gather<T: Copy>(src: &[T], vertices: &[u32]) -> Vec<T> {
        if src.is_empty() {
            return Vec::new();
        }
        vertices.iter().map(|&v| src[v as usize]).collect()
    }

    // Maps a per-vertex table of source vertices into the split. A source
    // outside the split leaves the vertex as its own source.
    let remap_sources = |sources: &[u32]| -> Vec<u32> {
        vertices
            .iter()
            .enumerate()
            .map(|(new, &old)| {
                remap.get(sources[old as usize] as usize).copied().flatten().unwrap_or(new as u32)
            })
            .collect()
    };
    let duplication = mesh.duplication.as_ref().map(|dup| {
        let indices = remap_sources(&dup.indices);
        let original_count =
            indices.iter().enumerate().filter(|&(i, &d)| d as usize == i).count() as u32;
        DuplicationIndices { indices, original_count }
    });
    let bones = mesh
        .bones
        .iter()
        .map(|bone| {
            let mut bone = bone.clone();
            bone.weights = bone
                .weights
                .iter()
                .filter_map(|&(v, w)| remap[v as usize].map(|v| (v, w)))
                .collect();
            bone
        })
        .collect();

    Some(Mesh {
        name: mesh.name.clone(),
        frame: mesh.frame,
        positions: gather(&mesh.positions, &vertices),
        normals: gather(&mesh.normals, &vertices),
        normal_faces: Vec::new(),
        tex_coords: gather(&mesh.tex_coords, &vertices),
        colors: gather(&mesh.colors, &vertices),
        face_materials: vec![0; faces.len()],
        face_edges: vec![3; faces.len()],
        faces,
        materials: vec![mesh.materials[material as usize].clone()],
        material_map: vec![mesh.material_map[material as usize]],
        duplication,
        adjacency: Vec::new(),
        skin_header: mesh.skin_header,
        bones,
        vertex_source: remap_sources(&mesh.vertex_source),
        influences: gather(&mesh.influences, &vertices),
    })
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec4};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::import::mesh::Bone;

    fn quad() -> Mesh {
        Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
            tex_coords: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y],
            faces: vec![[0, 1, 2], [0, 2, 3]],
            face_materials: vec![0, 1],
            face_edges: vec![3, 3],
            materials: vec![Material::default(), Material { name: "b".into(), ..Default::default() }],
            material_map: vec![0, 1],
            ..Default::default()
        }
    }

    #[test]
    fn one_normal_per_vertex() {
        let mut mesh = quad();
        mesh.normals = vec![Vec3::Z, Vec3::NEG_Z];
        // Vertices 0 and 2 are shared with different normals.
        mesh.normal_faces = vec![[0, 0, 0], [1, 1, 1]];
        match_face_lists(&mut mesh);
        assert_eq!(mesh.positions.len(), 6);
        assert_eq!(mesh.normals.len(), mesh.positions.len());
        assert_eq!(mesh.tex_coords.len(), mesh.positions.len());
        assert_eq!(mesh.faces, vec![[0, 1, 2], [4, 5, 3]]);
        assert_eq!(mesh.vertex_source, vec![0, 1, 2, 3, 0, 2]);
        assert_eq!(mesh.normals[4], Vec3::NEG_Z);
        assert_eq!(mesh.positions[5], mesh.positions[2]);
        assert_eq!(mesh.tex_coords[5], Vec2::ONE);
        for (face, tri) in mesh.faces.iter().enumerate() {
            for &v in tri {
                assert_eq!(mesh.normals[v as usize], if face == 0 { Vec3::Z } else { Vec3::NEG_Z });
            }
        }
    }

    #[test]
    fn duplicates_are_reused() {
        let mut mesh = quad();
        mesh.faces = vec![[0, 1, 2], [0, 2, 3], [0, 1, 3]];
        mesh.face_materials = vec![0, 0, 0];
        mesh.normals = vec![Vec3::Z, Vec3::NEG_Z];
        mesh.normal_faces = vec![[0, 0, 0], [1, 1, 1], [1, 0, 1]];
        match_face_lists(&mut mesh);
        // Vertex 0 with the second normal reuses the copy made for face 1.
        assert_eq!(mesh.faces[2], [4, 1, 3]);
        assert_eq!(mesh.positions.len(), 6);
    }

    #[test]
    fn global_materials_are_deduplicated() {
        let mut meshes = vec![quad(), quad()];
        meshes[1].materials.reverse();
        let global = make_global_material_list(&mut meshes);
        assert_eq!(global.len(), 2);
        assert_eq!(meshes[0].material_map, vec![0, 1]);
        assert_eq!(meshes[1].material_map, vec![1, 0]);
    }

    #[test]
    fn influence_ordering() {
        let mut influence = BoneInfluence::default();
        for (weight, frame) in [(0.2, 1), (0.5, 2), (0.1, 3), (0.3, 4), (0.4, 5), (0.05, 6)] {
            add_bone_influence(&mut influence, weight, frame);
        }
        assert_eq!(influence.weights, [0.5, 0.4, 0.3, 0.2]);
        assert_eq!(influence.frames, [2, 5, 4, 1]);
    }

    #[test]
    fn influences_sum_to_one() {
        let mut mesh = quad();
        mesh.frame = 7;
        mesh.vertex_source = vec![0, 1, 2, 3, 1];
        mesh.positions.push(Vec3::X);
        mesh.bones = vec![
            Bone { name: "a".into(), frame: 2, offset: glam::Mat4::IDENTITY, weights: vec![(0, 1.0), (1, 0.5)] },
            Bone { name: "b".into(), frame: 3, offset: glam::Mat4::IDENTITY, weights: vec![(1, 1.5)] },
        ];
        compute_bone_influences(&mut mesh);
        for influence in &mesh.influences {
            let total: f32 = influence.weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
        assert_eq!(mesh.influences[1].frames[..2], [3, 2]);
        assert_eq!(mesh.influences[1].weights[..2], [0.75, 0.25]);
        assert_eq!(mesh.influences[2], BoneInfluence {
            weights: [1.0, 0.0, 0.0, 0.0],
            frames: [7, 0, 0, 0]
        });
        assert_eq!(mesh.influences[4], mesh.influences[1]);
    }

    #[test]
    fn split_partitions_faces() {
        let mesh = quad();
        let split = split_meshes(vec![mesh.clone()]);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].faces, vec![[0, 1, 2]]);
        assert_eq!(split[0].positions, vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0)]);
        assert_eq!(split[1].faces, vec![[0, 1, 2]]);
        assert_eq!(split[1].positions, vec![Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0), Vec3::Y]);
        assert_eq!(split[1].material_map, vec![1]);
        assert_eq!(split[1].tex_coords, vec![Vec2::ZERO, Vec2::ONE, Vec2::Y]);

        let mut unused = mesh;
        unused.face_materials = vec![1, 1];
        assert_eq!(split_meshes(vec![unused]).len(), 1);
    }

    #[test]
    fn duplicates_copy_colors_and_duplication_indices() {
        let mut mesh = quad();
        mesh.colors = vec![Vec4::X, Vec4::Y, Vec4::Z, Vec4::W];
        mesh.duplication = Some(DuplicationIndices { indices: vec![0, 1, 2, 0], original_count: 3 });
        mesh.normals = vec![Vec3::Z, Vec3::NEG_Z];
        mesh.normal_faces = vec![[0, 0, 0], [1, 1, 1]];
        match_face_lists(&mut mesh);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [4, 5, 3]]);
        assert_eq!(mesh.colors, vec![Vec4::X, Vec4::Y, Vec4::Z, Vec4::W, Vec4::X, Vec4::Z]);
        let dup = mesh.duplication.unwrap();
        assert_eq!(dup.indices, vec![0, 1, 2, 0, 0, 2]);
        assert_eq!(dup.original_count, 3);
    }

    #[test]
    fn split_remaps_vertex_sources() {
        let material = |name: &str| Material { name: name.into(), ..Default::default() };
        let mesh = Mesh {
            // Vertex 4 is a copy of vertex 2.
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::ONE, Vec3::Y, Vec3::ONE],
            faces: vec![[0, 1, 2], [2, 3, 4], [1, 3, 4]],
            face_materials: vec![0, 1, 2],
            face_edges: vec![3; 3],
            materials: vec![material("a"), material("b"), material("c")],
            material_map: vec![0, 1, 2],
            duplication: Some(DuplicationIndices { indices: vec![0, 1, 2, 3, 2], original_count: 4 }),
            vertex_source: vec![0, 1, 2, 3, 2],
            ..Default::default()
        };
        let split = split_meshes(vec![mesh]);
        assert_eq!(split.len(), 3);

        assert_eq!(split[0].vertex_source, vec![0, 1, 2]);
        assert_eq!(split[0].duplication.as_ref().unwrap().original_count, 3);

        // Vertices [2, 3, 4]: the copy points at the split's own vertex 0.
        assert_eq!(split[1].vertex_source, vec![0, 1, 0]);
        assert_eq!(
            split[1].duplication,
            Some(DuplicationIndices { indices: vec![0, 1, 0], original_count: 2 })
        );

        // Vertices [1, 3, 4]: the source of the copy is not in this split.
        assert_eq!(split[2].vertex_source, vec![0, 1, 2]);
        assert_eq!(
            split[2].duplication,
            Some(DuplicationIndices { indices: vec![0, 1, 2], original_count: 3 })
        );

        for mesh in &split {
            for (vertex, &source) in mesh.vertex_source.iter().enumerate() {
                assert!(source as usize <= vertex && (source as usize) < mesh.positions.len());
            }
        }
    }
}
