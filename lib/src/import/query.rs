use glam::{Mat4, Vec2, Vec3, Vec4};
use serde_derive::Serialize;

use crate::{
    ensure_data,
    error::ImportError,
    import::{
        mesh::{Material, Mesh},
        scene::Frame,
        tangent::calculate_tangents,
    },
};

/// Public view of one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub parent: usize,
    pub depth: u32,
    pub num_children: u32,
    pub transform: Mat4,
    pub offset: Mat4,
}

impl From<&Frame> for NodeInfo {
    fn from(frame: &Frame) -> Self {
        Self {
            name: frame.name.clone(),
            parent: frame.parent,
            depth: frame.depth,
            num_children: frame.num_children,
            transform: frame.transform,
            offset: frame.offset,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum RenderMethod {
    PlainColour,
    TexturedPlain,
    PerPixelLit,
    PerPixelLitTextured,
}

impl RenderMethod {
    /// Picks the render method for a material, with its texture count.
    pub fn for_material(material: &Material) -> (Self, u32) {
        let plain = material.name.contains("Plain");
        match (plain, material.texture.is_some()) {
            (true, false) => (Self::PlainColour, 0),
            (true, true) => (Self::TexturedPlain, 1),
            (false, false) => (Self::PerPixelLit, 0),
            (false, true) => (Self::PerPixelLitTextured, 1),
        }
    }
}

/// Byte offsets of the fields present in an interleaved vertex.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct VertexLayout {
    pub stride: usize,
    pub position: usize,
    /// Four `f32` weights.
    pub bone_weights: Option<usize>,
    /// Four `u8` frame indices.
    pub bone_indices: Option<usize>,
    pub normal: Option<usize>,
    pub tangent: Option<usize>,
    pub tex_coord: Option<usize>,
    /// Four `f32` RGBA.
    pub color: Option<usize>,
}

impl VertexLayout {
    fn new(skinned: bool, normals: bool, tangents: bool, tex_coords: bool, colors: bool) -> Self {
        let mut layout = Self { stride: 12, ..Default::default() };
        let mut field = |present: bool, size: usize| {
            present.then(|| {
                let offset = layout.stride;
                layout.stride += size;
                offset
            })
        };
        let bone_weights = field(skinned, 16);
        let bone_indices = field(skinned, 4);
        let normal = field(normals, 12);
        let tangent = field(tangents, 12);
        let tex_coord = field(tex_coords, 8);
        let color = field(colors, 16);
        Self { bone_weights, bone_indices, normal, tangent, tex_coord, color, ..layout }
    }
}

/// A split mesh denormalized for rendering.
///
/// Vertex fields are stored in native byte order, which is little-endian on
/// every supported target.
#[derive(Clone, Debug, PartialEq)]
pub struct SubMeshRecord {
    pub frame: usize,
    pub vertex_count: usize,
    pub layout: VertexLayout,
    pub vertices: Vec<u8>,
    pub faces: Vec<[u32; 3]>,
    /// Global material index.
    pub material: usize,
    pub render_method: RenderMethod,
    pub texture_count: u32,
}

impl SubMeshRecord {
    pub fn build(
        mesh: &Mesh,
        materials: &[Material],
        want_tangents: bool,
    ) -> Result<Self, ImportError> {
        let count = mesh.positions.len();
        let tangents = if want_tangents { calculate_tangents(mesh) } else { None };
        let skinned = !mesh.influences.is_empty();
        let layout = VertexLayout::new(
            skinned,
            !mesh.normals.is_empty(),
            tangents.is_some(),
            !mesh.tex_coords.is_empty(),
            !mesh.colors.is_empty(),
        );

        let mut vertices = Vec::new();
        let size = layout.stride.checked_mul(count).ok_or(ImportError::OutOfSystemMemory)?;
        vertices.try_reserve_exact(size).map_err(|e| {
            log::warn!("Failed to allocate {size} bytes of vertex data: {e}");
            ImportError::OutOfSystemMemory
        })?;
        for v in 0..count {
            vertices.extend_from_slice(bytemuck::cast_slice(&mesh.positions[v].to_array()));
            if skinned {
                let influence = &mesh.influences[v];
                vertices.extend_from_slice(bytemuck::cast_slice(&influence.weights));
                for frame in influence.frames {
                    ensure_data!(
                        frame <= u8::MAX as u32,
                        "Bone frame {frame} does not fit a byte index"
                    );
                    vertices.push(frame as u8);
                }
            }
            if layout.normal.is_some() {
                vertices.extend_from_slice(bytemuck::cast_slice(&mesh.normals[v].to_array()));
            }
            if let Some(tangents) = &tangents {
                vertices.extend_from_slice(bytemuck::cast_slice(&tangents[v].to_array()));
            }
            if layout.tex_coord.is_some() {
                vertices.extend_from_slice(bytemuck::cast_slice(&mesh.tex_coords[v].to_array()));
            }
            if layout.color.is_some() {
                vertices.extend_from_slice(bytemuck::cast_slice(&mesh.colors[v].to_array()));
            }
        }

        let mut faces = Vec::new();
        faces.try_reserve_exact(mesh.faces.len()).map_err(|e| {
            log::warn!("Failed to allocate {} faces: {e}", mesh.faces.len());
            ImportError::OutOfSystemMemory
        })?;
        faces.extend_from_slice(&mesh.faces);

        let material = mesh.material_map.first().copied().unwrap_or_default() as usize;
        let (render_method, texture_count) = match materials.get(material) {
            Some(m) => RenderMethod::for_material(m),
            None => (RenderMethod::PerPixelLit, 0),
        };
        Ok(Self {
            frame: mesh.frame,
            vertex_count: count,
            layout,
            vertices,
            faces,
            material,
            render_method,
            texture_count,
        })
    }

    #[inline]
    fn field<T: bytemuck::Pod>(&self, vertex: usize, offset: Option<usize>) -> Option<T> {
        let start = vertex * self.layout.stride + offset?;
        let bytes = self.vertices.get(start..start + std::mem::size_of::<T>())?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn position(&self, vertex: usize) -> Option<Vec3> {
        self.field::<[f32; 3]>(vertex, Some(self.layout.position)).map(Vec3::from)
    }

    pub fn normal(&self, vertex: usize) -> Option<Vec3> {
        self.field::<[f32; 3]>(vertex, self.layout.normal).map(Vec3::from)
    }

    pub fn tangent(&self, vertex: usize) -> Option<Vec3> {
        self.field::<[f32; 3]>(vertex, self.layout.tangent).map(Vec3::from)
    }

    pub fn tex_coord(&self, vertex: usize) -> Option<Vec2> {
        self.field::<[f32; 2]>(vertex, self.layout.tex_coord).map(Vec2::from)
    }

    pub fn color(&self, vertex: usize) -> Option<Vec4> {
        self.field::<[f32; 4]>(vertex, self.layout.color).map(Vec4::from)
    }

    pub fn bone_weights(&self, vertex: usize) -> Option<[f32; 4]> {
        self.field(vertex, self.layout.bone_weights)
    }

    pub fn bone_indices(&self, vertex: usize) -> Option<[u8; 4]> {
        self.field(vertex, self.layout.bone_indices)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::import::mesh::BoneInfluence;

    fn triangle() -> Mesh {
        Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![Vec3::Z; 3],
            tex_coords: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
            faces: vec![[0, 1, 2]],
            face_materials: vec![0],
            materials: vec![Material::default()],
            material_map: vec![0],
            ..Default::default()
        }
    }

    #[test]
    fn layout_offsets() {
        let layout = VertexLayout::new(true, true, false, true, true);
        assert_eq!(layout, VertexLayout {
            stride: 12 + 20 + 12 + 8 + 16,
            position: 0,
            bone_weights: Some(12),
            bone_indices: Some(28),
            normal: Some(32),
            tangent: None,
            tex_coord: Some(44),
            color: Some(52),
        });
        assert_eq!(VertexLayout::new(false, false, false, false, false).stride, 12);
    }

    #[test]
    fn interleaved_vertices() {
        let mesh = triangle();
        let record = SubMeshRecord::build(&mesh, &[Material::default()], true).unwrap();
        assert_eq!(record.layout.stride, 12 + 12 + 12 + 8);
        assert_eq!(record.vertices.len(), 3 * record.layout.stride);
        assert_eq!(record.position(1), Some(Vec3::X));
        assert_eq!(record.normal(2), Some(Vec3::Z));
        assert_eq!(record.tex_coord(2), Some(Vec2::Y));
        assert_eq!(record.tangent(0), Some(Vec3::X));
        assert_eq!(record.color(0), None);
        assert_eq!(record.render_method, RenderMethod::PerPixelLit);
    }

    #[test]
    fn wide_bone_frame_is_invalid() {
        let mut mesh = triangle();
        mesh.influences = vec![
            BoneInfluence { weights: [1.0, 0.0, 0.0, 0.0], frames: [3, 0, 0, 0] },
            BoneInfluence { weights: [1.0, 0.0, 0.0, 0.0], frames: [256, 0, 0, 0] },
            BoneInfluence::default(),
        ];
        let err = SubMeshRecord::build(&mesh, &[], false).unwrap_err();
        assert_eq!(err, ImportError::InvalidData);

        mesh.influences[1].frames[0] = 255;
        let record = SubMeshRecord::build(&mesh, &[], false).unwrap();
        assert_eq!(record.bone_indices(1), Some([255, 0, 0, 0]));
        assert_eq!(record.bone_weights(0), Some([1.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn render_methods() {
        let mut material = Material { name: "PlainRed".into(), ..Default::default() };
        assert_eq!(RenderMethod::for_material(&material), (RenderMethod::PlainColour, 0));
        material.texture = Some("red.png".into());
        assert_eq!(RenderMethod::for_material(&material), (RenderMethod::TexturedPlain, 1));
        material.name = "Skin".into();
        assert_eq!(RenderMethod::for_material(&material), (RenderMethod::PerPixelLitTextured, 1));
    }
}
