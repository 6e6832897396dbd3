//! Turns a parsed `.X` file into frames, split meshes and a global material
//! table.

pub mod mesh;
pub mod normalize;
pub mod query;
pub mod scene;
pub mod tangent;

use std::path::Path;

use self::{
    mesh::{Material, Mesh},
    query::{NodeInfo, RenderMethod, SubMeshRecord},
    scene::{Frame, SceneBuilder},
};
use crate::{
    error::ImportError,
    format::xof::{is_xof, TemplateRegistry, XofFile},
    util::file::{map_file, read_prefix},
};

/// Imports one `.X` file at a time and answers queries about it.
#[derive(Clone, Debug, Default)]
pub struct Importer {
    frames: Vec<Frame>,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    imported: bool,
}

impl Importer {
    pub fn new() -> Self { Self::default() }

    /// Whether the file starts with the `.X` magic.
    pub fn is_xfile<P: AsRef<Path>>(path: P) -> bool {
        match read_prefix::<4, _>(path) {
            Ok(magic) => is_xof(&magic),
            Err(e) => {
                log::debug!("{e:#}");
                false
            }
        }
    }

    pub fn import_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ImportError> {
        self.clear();
        let data = map_file(&path).map_err(|e| {
            log::warn!("{e:#}");
            ImportError::FileError
        })?;
        log::debug!("Importing '{}' ({} bytes)", path.as_ref().display(), data.len());
        self.import_bytes(&data)
    }

    /// Imports a complete file held in memory. On failure the importer is
    /// left cleared.
    pub fn import_bytes(&mut self, data: &[u8]) -> Result<(), ImportError> {
        self.clear();
        let registry = TemplateRegistry::with_builtin()?;
        let file = XofFile::parse(data, &registry)?;
        let scene = SceneBuilder::build(&file)?;
        log::info!(
            "Imported {} frames, {} sub-meshes, {} materials",
            scene.frames.len(),
            scene.meshes.len(),
            scene.materials.len()
        );
        self.frames = scene.frames;
        self.meshes = scene.meshes;
        self.materials = scene.materials;
        self.imported = true;
        Ok(())
    }

    #[inline]
    pub fn is_imported(&self) -> bool { self.imported }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.meshes.clear();
        self.materials.clear();
        self.imported = false;
    }

    #[inline]
    pub fn num_nodes(&self) -> usize { self.frames.len() }

    pub fn node(&self, index: usize) -> Option<NodeInfo> { self.frames.get(index).map(NodeInfo::from) }

    #[inline]
    pub fn frames(&self) -> &[Frame] { &self.frames }

    #[inline]
    pub fn num_sub_meshes(&self) -> usize { self.meshes.len() }

    /// Builds the render record of one split mesh.
    pub fn sub_mesh(&self, index: usize, want_tangents: bool) -> Result<SubMeshRecord, ImportError> {
        let Some(mesh) = self.meshes.get(index) else {
            crate::bail_data!("Sub-mesh {index} of {}", self.meshes.len());
        };
        SubMeshRecord::build(mesh, &self.materials, want_tangents)
    }

    #[inline]
    pub fn meshes(&self) -> &[Mesh] { &self.meshes }

    #[inline]
    pub fn num_materials(&self) -> usize { self.materials.len() }

    pub fn material(&self, index: usize) -> Option<&Material> { self.materials.get(index) }

    pub fn material_render_method(&self, index: usize) -> Option<(RenderMethod, u32)> {
        self.materials.get(index).map(RenderMethod::for_material)
    }
}
