use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, DirBuilder},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use argh::FromArgs;
use gltf_json::{self as json, buffer::Stride, validation::USize64};
use json::validation::Checked::Valid;
use serde_json::json;
use xoflib::{
    import::query::{SubMeshRecord, VertexLayout},
    Importer,
};

#[derive(FromArgs, PartialEq, Debug)]
/// process .X files
#[argh(subcommand, name = "xof")]
pub struct Args {
    #[argh(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Info(InfoArgs),
    Convert(ConvertArgs),
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// prints the frames, meshes and materials of a .X file
#[argh(subcommand, name = "info")]
pub struct InfoArgs {
    #[argh(positional)]
    /// input .X file
    input: PathBuf,
    #[argh(switch)]
    /// print a JSON summary to stdout
    json: bool,
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// converts a .X file to glTF
#[argh(subcommand, name = "convert")]
pub struct ConvertArgs {
    #[argh(positional)]
    /// input .X file
    input: PathBuf,
    #[argh(positional)]
    /// output directory
    out_dir: PathBuf,
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        SubCommand::Info(c_args) => info(c_args),
        SubCommand::Convert(c_args) => convert(c_args),
    }
}

fn import(path: &Path) -> Result<Importer> {
    let mut importer = Importer::new();
    importer
        .import_file(path)
        .with_context(|| format!("Failed to import '{}'", path.display()))?;
    Ok(importer)
}

fn sub_meshes(importer: &Importer, want_tangents: bool) -> Result<Vec<SubMeshRecord>> {
    (0..importer.num_sub_meshes())
        .map(|i| {
            importer.sub_mesh(i, want_tangents).with_context(|| format!("Failed to build sub-mesh {i}"))
        })
        .collect()
}

fn info(args: InfoArgs) -> Result<()> {
    let importer = import(&args.input)?;
    let records = sub_meshes(&importer, false)?;
    if args.json {
        let nodes: Vec<_> = (0..importer.num_nodes()).filter_map(|i| importer.node(i)).collect();
        let meshes: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "frame": r.frame,
                    "vertex_count": r.vertex_count,
                    "triangle_count": r.faces.len(),
                    "layout": r.layout,
                    "material": r.material,
                    "render_method": r.render_method,
                    "texture_count": r.texture_count,
                })
            })
            .collect();
        let materials: Vec<_> =
            (0..importer.num_materials()).filter_map(|i| importer.material(i)).collect();
        let summary = json!({
            "nodes": nodes,
            "sub_meshes": meshes,
            "materials": materials,
        });
        serde_json::to_writer_pretty(std::io::stdout().lock(), &summary)?;
        println!();
        return Ok(());
    }

    log::info!("{} frames", importer.num_nodes());
    for (i, frame) in importer.frames().iter().enumerate() {
        log::info!(
            "{:indent$}[{i}] '{}' ({} children)",
            "",
            frame.name,
            frame.num_children,
            indent = frame.depth as usize * 2
        );
    }
    log::info!("{} sub-meshes", records.len());
    for (i, record) in records.iter().enumerate() {
        log::info!(
            "[{i}] frame {}: {} vertices, {} triangles, stride {}, material {} ({:?})",
            record.frame,
            record.vertex_count,
            record.faces.len(),
            record.layout.stride,
            record.material,
            record.render_method
        );
    }
    log::info!("{} materials", importer.num_materials());
    for i in 0..importer.num_materials() {
        let Some(material) = importer.material(i) else { continue };
        log::info!(
            "[{i}] '{}' diffuse {} texture {}",
            material.name,
            material.diffuse,
            material.texture.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn convert(args: ConvertArgs) -> Result<()> {
    let importer = import(&args.input)?;
    let records = sub_meshes(&importer, false)?;
    let stem = args
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".into());

    // Every sub-mesh gets an interleaved vertex view and an index view in one buffer.
    let mut buffer: Vec<u8> = Vec::new();
    let mut json_buffer_views = Vec::new();
    let mut json_accessors = Vec::new();
    let mut json_primitives: BTreeMap<usize, Vec<json::mesh::Primitive>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        let vertex_view = json_buffer_views.len() as u32;
        json_buffer_views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64::from(record.vertices.len()),
            byte_offset: Some(USize64::from(buffer.len())),
            byte_stride: Some(Stride(record.layout.stride)),
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(format!("Sub-mesh {idx} vertices")),
            target: Some(Valid(json::buffer::Target::ArrayBuffer)),
        });
        buffer.extend_from_slice(&record.vertices);

        let index_bytes: &[u8] = bytemuck::cast_slice(&record.faces);
        let index_view = json_buffer_views.len() as u32;
        json_buffer_views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64::from(index_bytes.len()),
            byte_offset: Some(USize64::from(buffer.len())),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(format!("Sub-mesh {idx} indices")),
            target: Some(Valid(json::buffer::Target::ElementArrayBuffer)),
        });
        buffer.extend_from_slice(index_bytes);

        let mut attributes = BTreeMap::new();
        for (semantic, offset, type_) in vertex_attributes(&record.layout) {
            let (min, max) = if semantic == json::mesh::Semantic::Positions {
                let (min, max) = position_bounds(record);
                (Some(json!(min)), Some(json!(max)))
            } else {
                (None, None)
            };
            let accessor_idx = json_accessors.len() as u32;
            json_accessors.push(json::Accessor {
                buffer_view: Some(json::Index::new(vertex_view)),
                byte_offset: Some(USize64(offset as u64)),
                count: USize64(record.vertex_count as u64),
                component_type: Valid(json::accessor::GenericComponentType(
                    json::accessor::ComponentType::F32,
                )),
                extensions: None,
                extras: Default::default(),
                type_: Valid(type_),
                min,
                max,
                name: Some(format!("Sub-mesh {idx} {semantic:?}")),
                normalized: false,
                sparse: None,
            });
            attributes.insert(Valid(semantic), json::Index::new(accessor_idx));
        }

        let index_accessor_idx = json_accessors.len() as u32;
        json_accessors.push(json::Accessor {
            buffer_view: Some(json::Index::new(index_view)),
            byte_offset: None,
            count: USize64(record.faces.len() as u64 * 3),
            component_type: Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::U32,
            )),
            extensions: None,
            extras: Default::default(),
            type_: Valid(json::accessor::Type::Scalar),
            min: None,
            max: None,
            name: Some(format!("Sub-mesh {idx} indices")),
            normalized: false,
            sparse: None,
        });
        json_primitives.entry(record.frame).or_default().push(json::mesh::Primitive {
            attributes,
            extensions: None,
            extras: Default::default(),
            indices: Some(json::Index::new(index_accessor_idx)),
            material: Some(json::Index::new(record.material as u32)),
            mode: Default::default(),
            targets: None,
        });
    }

    DirBuilder::new().recursive(true).create(&args.out_dir)?;
    let bin_name = format!("{stem}.bin");
    fs::write(args.out_dir.join(&bin_name), &buffer)?;
    let json_buffers = vec![json::Buffer {
        byte_length: buffer.len().into(),
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        uri: Some(bin_name),
    }];

    let mut json_textures = Vec::new();
    let mut json_images = Vec::new();
    let mut texture_map: HashMap<String, usize> = HashMap::new();
    let mut json_materials = Vec::with_capacity(importer.num_materials());
    for idx in 0..importer.num_materials() {
        let Some(material) = importer.material(idx) else { continue };
        let base_color_texture = material.texture.as_ref().map(|texture| {
            let texture_idx = *texture_map.entry(texture.clone()).or_insert_with(|| {
                json_images.push(json::Image {
                    buffer_view: None,
                    mime_type: None,
                    name: Some(texture.clone()),
                    uri: Some(texture.clone()),
                    extensions: None,
                    extras: None,
                });
                json_textures.push(json::Texture {
                    name: Some(texture.clone()),
                    sampler: None,
                    source: json::Index::new((json_images.len() - 1) as u32),
                    extensions: None,
                    extras: None,
                });
                json_textures.len() - 1
            });
            json::texture::Info {
                index: json::Index::new(texture_idx as u32),
                tex_coord: 0,
                extensions: None,
                extras: None,
            }
        });
        json_materials.push(json::Material {
            alpha_cutoff: None,
            alpha_mode: Valid(if material.diffuse.w < 1.0 {
                json::material::AlphaMode::Blend
            } else {
                json::material::AlphaMode::Opaque
            }),
            double_sided: false,
            name: Some(material.name.clone()),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor(
                    material.diffuse.to_array(),
                ),
                base_color_texture,
                metallic_factor: json::material::StrengthFactor(0.0),
                roughness_factor: json::material::StrengthFactor(1.0),
                metallic_roughness_texture: None,
                extensions: None,
                extras: None,
            },
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
            emissive_factor: json::material::EmissiveFactor(material.emissive.to_array()),
            extensions: None,
            extras: None,
        });
    }

    let mut json_meshes = Vec::with_capacity(json_primitives.len());
    let mut frame_meshes = HashMap::new();
    for (frame, primitives) in json_primitives {
        frame_meshes.insert(frame, json_meshes.len());
        json_meshes.push(json::Mesh {
            extensions: None,
            extras: Default::default(),
            name: importer.node(frame).map(|n| n.name).filter(|n| !n.is_empty()),
            primitives,
            weights: None,
        });
    }

    let frames = importer.frames();
    let mut children: Vec<Vec<json::Index<json::Node>>> = vec![Vec::new(); frames.len()];
    for (idx, frame) in frames.iter().enumerate().skip(1) {
        children[frame.parent].push(json::Index::new(idx as u32));
    }
    let mut json_nodes = Vec::with_capacity(frames.len());
    for ((idx, frame), children) in frames.iter().enumerate().zip(children) {
        json_nodes.push(json::Node {
            camera: None,
            children: (!children.is_empty()).then_some(children),
            extensions: None,
            extras: None,
            matrix: (frame.transform != glam::Mat4::IDENTITY)
                .then(|| frame.transform.to_cols_array()),
            mesh: frame_meshes.get(&idx).map(|&mesh| json::Index::new(mesh as u32)),
            name: (!frame.name.is_empty()).then(|| frame.name.clone()),
            rotation: None,
            scale: None,
            translation: None,
            skin: None,
            weights: None,
        });
    }

    let json_root = json::Root {
        accessors: json_accessors,
        animations: vec![],
        asset: Default::default(),
        buffers: json_buffers,
        buffer_views: json_buffer_views,
        scene: Some(json::Index::new(0)),
        extensions: None,
        extras: Default::default(),
        extensions_used: vec![],
        extensions_required: vec![],
        cameras: vec![],
        images: json_images,
        materials: json_materials,
        meshes: json_meshes,
        nodes: json_nodes,
        samplers: vec![],
        scenes: vec![json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("Scene".into()),
            nodes: vec![json::Index::new(0)],
        }],
        skins: vec![],
        textures: json_textures,
    };
    let gltf_path = args.out_dir.join(format!("{stem}.gltf"));
    let writer = fs::File::create(&gltf_path)
        .with_context(|| format!("Failed to create '{}'", gltf_path.display()))?;
    json::serialize::to_writer_pretty(writer, &json_root)?;
    log::info!("Wrote {}", gltf_path.display());
    Ok(())
}

/// glTF attributes present in a vertex layout. Bone data needs a skin and is
/// left out.
fn vertex_attributes(
    layout: &VertexLayout,
) -> Vec<(json::mesh::Semantic, usize, json::accessor::Type)> {
    let mut out = vec![(json::mesh::Semantic::Positions, layout.position, json::accessor::Type::Vec3)];
    if let Some(offset) = layout.normal {
        out.push((json::mesh::Semantic::Normals, offset, json::accessor::Type::Vec3));
    }
    if let Some(offset) = layout.tex_coord {
        out.push((json::mesh::Semantic::TexCoords(0), offset, json::accessor::Type::Vec2));
    }
    if let Some(offset) = layout.color {
        out.push((json::mesh::Semantic::Colors(0), offset, json::accessor::Type::Vec4));
    }
    out
}

fn position_bounds(record: &SubMeshRecord) -> ([f32; 3], [f32; 3]) {
    let mut min = glam::Vec3::splat(f32::INFINITY);
    let mut max = glam::Vec3::splat(f32::NEG_INFINITY);
    for v in 0..record.vertex_count {
        if let Some(p) = record.position(v) {
            min = min.min(p);
            max = max.max(p);
        }
    }
    (min.to_array(), max.to_array())
}
