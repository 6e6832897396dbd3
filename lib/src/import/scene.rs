use std::collections::HashSet;

use binrw::BinReaderExt;
use glam::Mat4;
use serde_derive::Serialize;

use crate::{
    bail_data,
    error::ImportError,
    format::{
        xof::{
            template::{TID_FRAME, TID_FRAME_TRANSFORM_MATRIX, TID_MESH},
            XofFile, XofObject,
        },
        CMatrix4f,
    },
    import::{
        mesh::{read_mesh, Material, Mesh},
        normalize::{compute_bone_influences, make_global_material_list, split_meshes},
    },
    util::cursor::DataCursor,
};

const MATRIX_SIZE: usize = 64;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Frame {
    /// May be empty or shared with other frames.
    pub name: String,
    pub depth: u32,
    /// The root is its own parent.
    pub parent: usize,
    pub num_children: u32,
    /// Local to parent.
    pub transform: Mat4,
    /// Bind-pose offset when the frame is a bone, identity otherwise.
    pub offset: Mat4,
}

/// Everything a successful import produces.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    /// Depth-first, root first.
    pub frames: Vec<Frame>,
    /// Split meshes, one material each.
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
}

#[derive(Default)]
pub struct SceneBuilder {
    frames: Vec<Frame>,
    meshes: Vec<Mesh>,
    /// Ids of the Frame objects already in the hierarchy.
    placed: HashSet<usize>,
}

impl SceneBuilder {
    pub fn build(file: &XofFile) -> Result<Scene, ImportError> {
        let mut builder = Self::default();
        builder.parse_root(file)?;
        builder.finish()
    }

    /// Top-level objects hang off an unnamed root frame.
    fn parse_root(&mut self, file: &XofFile) -> Result<(), ImportError> {
        self.frames.push(Frame {
            name: String::new(),
            depth: 0,
            parent: 0,
            num_children: 0,
            transform: Mat4::IDENTITY,
            offset: Mat4::IDENTITY,
        });
        for child in file.children() {
            self.parse_child(child, 0)?;
        }
        Ok(())
    }

    fn parse_child(&mut self, object: XofObject, frame: usize) -> Result<(), ImportError> {
        match object.type_guid() {
            TID_FRAME => self.parse_frame(object, frame),
            TID_FRAME_TRANSFORM_MATRIX => {
                let mut c = DataCursor::with_size(object.lock(), MATRIX_SIZE)?;
                self.frames[frame].transform = Mat4::from(c.read_le::<CMatrix4f>()?);
                Ok(())
            }
            TID_MESH => self.parse_mesh(object, frame),
            _ => {
                log::trace!("Ignoring {} '{}'", object.template_name(), object.name());
                Ok(())
            }
        }
    }

    /// A Frame object enters the hierarchy once, where it is first reached.
    /// Later references to it are skipped.
    fn parse_frame(&mut self, object: XofObject, parent: usize) -> Result<(), ImportError> {
        if !self.placed.insert(object.id()) {
            log::warn!(
                "Frame '{}' is already in the hierarchy, ignoring reference under frame {parent}",
                object.name()
            );
            return Ok(());
        }
        let index = self.frames.len();
        let depth = self.frames[parent].depth + 1;
        self.frames[parent].num_children += 1;
        self.frames.push(Frame {
            name: object.name().to_string(),
            depth,
            parent,
            num_children: 0,
            transform: Mat4::IDENTITY,
            offset: Mat4::IDENTITY,
        });
        log::debug!("Frame {index} '{}' (parent {parent})", object.name());
        for child in object.children() {
            self.parse_child(child, index)?;
        }
        Ok(())
    }

    fn parse_mesh(&mut self, object: XofObject, owner: usize) -> Result<(), ImportError> {
        let mesh = read_mesh(object, owner)?;
        self.meshes.push(mesh);
        Ok(())
    }

    /// Binds every bone to the first frame with its name and stores its
    /// offset on that frame.
    fn process_bones(&mut self) -> Result<(), ImportError> {
        for mesh in &mut self.meshes {
            for bone in &mut mesh.bones {
                let Some(frame) = self.frames.iter().position(|f| f.name == bone.name) else {
                    bail_data!("Bone '{}' of mesh '{}' has no frame", bone.name, mesh.name);
                };
                bone.frame = frame;
                self.frames[frame].offset = bone.offset;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Scene, ImportError> {
        let materials = make_global_material_list(&mut self.meshes);
        self.process_bones()?;
        for mesh in &mut self.meshes {
            compute_bone_influences(mesh);
        }
        let meshes = split_meshes(self.meshes);
        log::debug!(
            "Scene: {} frames, {} sub-meshes, {} materials",
            self.frames.len(),
            meshes.len(),
            materials.len()
        );
        Ok(Scene { frames: self.frames, meshes, materials })
    }
}
