use std::collections::HashSet;

use binrw::BinReaderExt;
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde_derive::Serialize;

use crate::{
    bail_data, ensure_data,
    error::ImportError,
    format::{
        xof::{template::*, XofObject},
        CColor3f, CColor4f, CMatrix4f, CVector2f, CVector3f,
    },
    import::normalize::match_face_lists,
    util::cursor::DataCursor,
};

/// Size of a packed `Material`: ColorRGBA, FLOAT, ColorRGB, ColorRGB.
const MATERIAL_SIZE: usize = 44;
const SKIN_HEADER_SIZE: usize = 6;
const MATRIX_SIZE: usize = 64;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Material {
    pub name: String,
    pub diffuse: Vec4,
    pub power: f32,
    pub specular: Vec3,
    pub emissive: Vec3,
    pub texture: Option<String>,
}

impl Default for Material {
    /// Opaque white, untextured.
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse: Vec4::ONE,
            power: 0.0,
            specular: Vec3::ZERO,
            emissive: Vec3::ZERO,
            texture: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    /// Name of the frame this bone drives.
    pub name: String,
    /// Resolved frame index, set once the frame tree is complete.
    pub frame: usize,
    /// Bind-pose offset: mesh space to bone space.
    pub offset: Mat4,
    /// (vertex, weight) pairs.
    pub weights: Vec<(u32, f32)>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SkinHeader {
    pub max_weights_per_vertex: u16,
    pub max_weights_per_face: u16,
    pub num_bones: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DuplicationIndices {
    /// For every vertex, the original vertex it was duplicated from.
    pub indices: Vec<u32>,
    pub original_count: u32,
}

/// Up to four bone influences, strongest first.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BoneInfluence {
    pub weights: [f32; 4],
    pub frames: [u32; 4],
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    /// Owning frame.
    pub frame: usize,
    pub positions: Vec<Vec3>,
    /// Empty when the mesh has no normals. One per vertex once matched.
    pub normals: Vec<Vec3>,
    /// Triangulated normal indices, consumed by [`match_face_lists`].
    pub normal_faces: Vec<[u32; 3]>,
    pub tex_coords: Vec<Vec2>,
    pub colors: Vec<Vec4>,
    pub faces: Vec<[u32; 3]>,
    /// Local material per triangle.
    pub face_materials: Vec<u32>,
    /// Edge count of every face as read, before triangulation.
    pub face_edges: Vec<u32>,
    pub materials: Vec<Material>,
    /// Local to global material index.
    pub material_map: Vec<u32>,
    pub duplication: Option<DuplicationIndices>,
    pub adjacency: Vec<u32>,
    pub skin_header: Option<SkinHeader>,
    pub bones: Vec<Bone>,
    /// Original vertex of every vertex, itself unless duplicated.
    pub vertex_source: Vec<u32>,
    /// Empty unless the mesh is skinned.
    pub influences: Vec<BoneInfluence>,
}

impl Mesh {
    #[inline]
    pub fn num_vertices(&self) -> usize { self.positions.len() }
}

/// Reads a `Mesh` object and its children into a raw mesh owned by `frame`.
pub fn read_mesh(object: XofObject, frame: usize) -> Result<Mesh, ImportError> {
    let mut reader = MeshReader {
        mesh: Mesh { name: object.name().to_string(), frame, ..Default::default() },
        seen: HashSet::new(),
    };
    reader.read_geometry(object.lock())?;
    for child in object.children() {
        reader.read_child(child)?;
    }
    let mesh = reader.finish()?;
    log::debug!(
        "Mesh '{}': {} vertices, {} triangles, {} materials, {} bones",
        mesh.name,
        mesh.positions.len(),
        mesh.faces.len(),
        mesh.materials.len(),
        mesh.bones.len()
    );
    Ok(mesh)
}

struct MeshReader {
    mesh: Mesh,
    /// Singleton child templates already read.
    seen: HashSet<uuid::Uuid>,
}

/// Appends the fan (0, i, i + 1) of a polygon.
fn fan_triangulate(indices: &[u32], out: &mut Vec<[u32; 3]>) {
    for i in 1..indices.len().saturating_sub(1) {
        out.push([indices[0], indices[i], indices[i + 1]]);
    }
}

impl MeshReader {
    fn read_geometry(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let mut c = DataCursor::new(data);
        let num_vertices = c.read_count()?;
        self.mesh.positions =
            c.read_list(num_vertices, 12, |c| Ok(Vec3::from(c.read_le::<CVector3f>()?)))?;
        let num_faces = c.read_count()?;
        c.ensure_fits(num_faces, 4)?;
        for face in 0..num_faces {
            let num_edges = c.read_count()?;
            ensure_data!(num_edges >= 3, "Face {face} has {num_edges} edges");
            let indices = c.read_u32_list(num_edges)?;
            if let Some(&bad) = indices.iter().find(|&&i| i as usize >= num_vertices) {
                bail_data!("Face {face} references vertex {bad} of {num_vertices}");
            }
            fan_triangulate(&indices, &mut self.mesh.faces);
            self.mesh.face_edges.push(num_edges as u32);
        }
        c.expect_end()
    }

    fn read_child(&mut self, child: XofObject) -> Result<(), ImportError> {
        let guid = child.type_guid();
        if guid != TID_SKIN_WEIGHTS && self.is_singleton(guid) {
            ensure_data!(
                self.seen.insert(guid),
                "Mesh '{}' has more than one {}",
                self.mesh.name,
                child.template_name()
            );
        }
        match guid {
            TID_MESH_NORMALS => self.read_normals(child.lock()),
            TID_MESH_TEXTURE_COORDS => self.read_tex_coords(child.lock()),
            TID_MESH_VERTEX_COLORS => self.read_vertex_colors(child.lock()),
            TID_MESH_MATERIAL_LIST => self.read_material_list(child),
            TID_VERTEX_DUPLICATION_INDICES => self.read_duplication_indices(child.lock()),
            TID_FACE_ADJACENCY => self.read_adjacency(child.lock()),
            TID_XSKIN_MESH_HEADER => self.read_skin_header(child.lock()),
            TID_SKIN_WEIGHTS => self.read_skin_weights(child.lock()),
            _ => {
                log::trace!("Ignoring {} in mesh '{}'", child.template_name(), self.mesh.name);
                Ok(())
            }
        }
    }

    #[inline]
    fn is_singleton(&self, guid: uuid::Uuid) -> bool {
        matches!(
            guid,
            TID_MESH_NORMALS
                | TID_MESH_TEXTURE_COORDS
                | TID_MESH_VERTEX_COLORS
                | TID_MESH_MATERIAL_LIST
                | TID_VERTEX_DUPLICATION_INDICES
                | TID_FACE_ADJACENCY
                | TID_XSKIN_MESH_HEADER
        )
    }

    fn read_normals(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let mut c = DataCursor::new(data);
        let num_normals = c.read_count()?;
        let normals =
            c.read_list(num_normals, 12, |c| Ok(Vec3::from(c.read_le::<CVector3f>()?)))?;
        let num_faces = c.read_count()?;
        ensure_data!(
            num_faces == self.mesh.face_edges.len(),
            "Mesh '{}' has {} normal faces for {} faces",
            self.mesh.name,
            num_faces,
            self.mesh.face_edges.len()
        );
        c.ensure_fits(num_faces, 4)?;
        let mut faces = Vec::with_capacity(self.mesh.faces.len());
        for face in 0..num_faces {
            let num_edges = c.read_count()?;
            ensure_data!(
                num_edges == self.mesh.face_edges[face] as usize,
                "Normal face {face} has {num_edges} edges, geometry has {}",
                self.mesh.face_edges[face]
            );
            let indices = c.read_u32_list(num_edges)?;
            if let Some(&bad) = indices.iter().find(|&&i| i as usize >= num_normals) {
                bail_data!("Normal face {face} references normal {bad} of {num_normals}");
            }
            fan_triangulate(&indices, &mut faces);
        }
        c.expect_end()?;
        self.mesh.normals = normals;
        self.mesh.normal_faces = faces;
        Ok(())
    }

    fn read_tex_coords(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let mut c = DataCursor::new(data);
        let count = c.read_count()?;
        ensure_data!(
            count == self.mesh.num_vertices(),
            "Mesh '{}' has {} texture coordinates for {} vertices",
            self.mesh.name,
            count,
            self.mesh.num_vertices()
        );
        self.mesh.tex_coords =
            c.read_list(count, 8, |c| Ok(Vec2::from(c.read_le::<CVector2f>()?)))?;
        c.expect_end()
    }

    fn read_vertex_colors(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let mut c = DataCursor::new(data);
        let count = c.read_count()?;
        let num_vertices = self.mesh.num_vertices();
        let pairs = c.read_list(count, 20, |c| {
            let index = c.read_u32()?;
            let color = Vec4::from(c.read_le::<CColor4f>()?);
            Ok((index, color))
        })?;
        c.expect_end()?;
        let mut colors = vec![Vec4::ONE; num_vertices];
        for (index, color) in pairs {
            ensure_data!(
                (index as usize) < num_vertices,
                "Vertex colour for vertex {index} of {num_vertices}"
            );
            colors[index as usize] = color;
        }
        self.mesh.colors = colors;
        Ok(())
    }

    fn read_material_list(&mut self, object: XofObject) -> Result<(), ImportError> {
        let mut c = DataCursor::new(object.lock());
        let num_materials = c.read_count()?;
        let num_indices = c.read_count()?;
        let indices = c.read_u32_list(num_indices)?;
        c.expect_end()?;
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= num_materials) {
            bail_data!("Face material {bad} of {num_materials} in mesh '{}'", self.mesh.name);
        }

        let num_faces = self.mesh.face_edges.len();
        let face_materials = if num_indices == 1 && num_faces != 1 {
            vec![indices[0]; self.mesh.faces.len()]
        } else {
            ensure_data!(
                num_indices == num_faces,
                "Mesh '{}' has {} face materials for {} faces",
                self.mesh.name,
                num_indices,
                num_faces
            );
            let mut out = Vec::with_capacity(self.mesh.faces.len());
            for (&material, &edges) in indices.iter().zip(&self.mesh.face_edges) {
                out.extend(std::iter::repeat(material).take(edges as usize - 2));
            }
            out
        };

        let mut materials = Vec::with_capacity(num_materials);
        for child in object.children() {
            if child.type_guid() != TID_MATERIAL {
                log::trace!("Ignoring {} in material list", child.template_name());
                continue;
            }
            if materials.len() == num_materials {
                log::warn!(
                    "Mesh '{}' material list declares {} materials, ignoring extra '{}'",
                    self.mesh.name,
                    num_materials,
                    child.name()
                );
                continue;
            }
            materials.push(read_material(child)?);
        }
        ensure_data!(
            materials.len() == num_materials,
            "Mesh '{}' declares {} materials but has {}",
            self.mesh.name,
            num_materials,
            materials.len()
        );
        self.mesh.face_materials = face_materials;
        self.mesh.materials = materials;
        Ok(())
    }

    fn read_duplication_indices(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let mut c = DataCursor::new(data);
        let count = c.read_count()?;
        let original_count = c.read_u32()?;
        ensure_data!(
            count == self.mesh.num_vertices(),
            "Mesh '{}' has {} duplication indices for {} vertices",
            self.mesh.name,
            count,
            self.mesh.num_vertices()
        );
        let indices = c.read_u32_list(count)?;
        c.expect_end()?;
        self.mesh.duplication = Some(DuplicationIndices { indices, original_count });
        Ok(())
    }

    fn read_adjacency(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let mut c = DataCursor::new(data);
        let count = c.read_count()?;
        self.mesh.adjacency = c.read_u32_list(count)?;
        c.expect_end()
    }

    fn read_skin_header(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let mut c = DataCursor::with_size(data, SKIN_HEADER_SIZE)?;
        let header = SkinHeader {
            max_weights_per_vertex: c.read_u16()?,
            max_weights_per_face: c.read_u16()?,
            num_bones: c.read_u16()?,
        };
        self.mesh.bones.reserve(header.num_bones as usize);
        self.mesh.skin_header = Some(header);
        Ok(())
    }

    fn read_skin_weights(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let Some(header) = self.mesh.skin_header else {
            bail_data!("Skin weights before XSkinMeshHeader in mesh '{}'", self.mesh.name);
        };
        ensure_data!(
            self.mesh.bones.len() < header.num_bones as usize,
            "Mesh '{}' has more skin weights than its {} bones",
            self.mesh.name,
            header.num_bones
        );
        let mut c = DataCursor::new(data);
        let name = c.read_cstr()?;
        let count = c.read_count()?;
        let vertices = c.read_u32_list(count)?;
        let weights = c.read_f32_list(count)?;
        c.ensure_fits(1, MATRIX_SIZE)?;
        let offset = Mat4::from(c.read_le::<CMatrix4f>()?);
        c.expect_end()?;
        let num_vertices = self.mesh.num_vertices();
        if let Some(&bad) = vertices.iter().find(|&&v| v as usize >= num_vertices) {
            bail_data!("Bone '{name}' weights vertex {bad} of {num_vertices}");
        }
        self.mesh.bones.push(Bone {
            name,
            frame: 0,
            offset,
            weights: vertices.into_iter().zip(weights).collect(),
        });
        Ok(())
    }

    fn finish(mut self) -> Result<Mesh, ImportError> {
        if let Some(header) = self.mesh.skin_header {
            ensure_data!(
                self.mesh.bones.len() == header.num_bones as usize,
                "Mesh '{}' declares {} bones but has {} skin weights",
                self.mesh.name,
                header.num_bones,
                self.mesh.bones.len()
            );
        }
        if self.mesh.materials.is_empty() {
            self.mesh.materials.push(Material::default());
            self.mesh.face_materials = vec![0; self.mesh.faces.len()];
        }
        match_face_lists(&mut self.mesh);
        Ok(self.mesh)
    }
}

/// Reads a `Material` object, inline or referenced.
pub fn read_material(object: XofObject) -> Result<Material, ImportError> {
    let mut c = DataCursor::with_size(object.lock(), MATERIAL_SIZE)?;
    let diffuse = Vec4::from(c.read_le::<CColor4f>()?);
    let power = c.read_f32()?;
    let specular = Vec3::from(c.read_le::<CColor3f>()?);
    let emissive = Vec3::from(c.read_le::<CColor3f>()?);
    let texture = match object.children().find(|c| c.type_guid() == TID_TEXTURE_FILENAME) {
        Some(child) => Some(DataCursor::new(child.lock()).read_cstr()?),
        None => None,
    };
    Ok(Material { name: object.name().to_string(), diffuse, power, specular, emissive, texture })
}
