use glam::{Vec3, Vec4};
use pretty_assertions::assert_eq;
use xoflib::{
    import::query::RenderMethod,
    ImportError, Importer,
};

const IDENTITY: &str = "1.0,0.0,0.0,0.0, 0.0,1.0,0.0,0.0, 0.0,0.0,1.0,0.0, 0.0,0.0,0.0,1.0;;";

fn scene_text() -> String {
    format!(
        r#"xof 0303txt 0032
// Exported for tests
template Marker {{
    <5E3F0A11-9C2B-4B7A-8E11-3F6A2D0C9B01>
    DWORD id;
}}

Header {{ 1; 0; 1; }}

Material Shared {{
    0.5;0.5;0.5;1.0;;
    2.0;
    1.0;1.0;1.0;;
    0.0;0.0;0.0;;
    TextureFilename {{ "shared.png"; }}
}}

Frame Root {{
    FrameTransformMatrix {{ {IDENTITY} }}
    Marker {{ 7; }}
    Frame Bone {{
        FrameTransformMatrix {{ 1.0,0.0,0.0,0.0, 0.0,1.0,0.0,0.0, 0.0,0.0,1.0,0.0, 0.0,2.0,0.0,1.0;; }}
    }}
    Mesh Quad {{
        5;
        0.0;0.0;0.0;,
        1.0;0.0;0.0;,
        1.0;1.0;0.0;,
        0.0;1.0;0.0;,
        2.0;0.5;0.0;;
        2;
        4;0,1,2,3;,
        3;1,4,2;;
        MeshNormals {{
            2;
            0.0;0.0;1.0;,
            0.0;0.0;-1.0;;
            2;
            4;0,0,0,0;,
            3;1,1,1;;
        }}
        MeshTextureCoords {{
            5;
            0.0;0.0;, 1.0;0.0;, 1.0;1.0;, 0.0;1.0;, 0.5;0.5;;
        }}
        MeshMaterialList {{
            2;
            2;
            0,
            1;;
            {{ Shared }}
            Material PlainRed {{
                1.0;0.0;0.0;1.0;;
                0.0;
                0.0;0.0;0.0;;
                0.0;0.0;0.0;;
            }}
        }}
        XSkinMeshHeader {{ 2; 2; 1; }}
        SkinWeights {{
            "Bone";
            3;
            0, 1, 4;
            1.0, 0.5, 0.25;
            {IDENTITY}
        }}
    }}
}}

Mesh Second {{
    3;
    0.0;0.0;1.0;, 1.0;0.0;1.0;, 0.0;1.0;1.0;;
    1;
    3;0,1,2;;
    MeshMaterialList {{ 1; 1; 0;; {{ Shared }} }}
}}
"#
    )
}

fn import_text(text: &str) -> Result<Importer, ImportError> {
    let mut importer = Importer::new();
    importer.import_bytes(text.as_bytes())?;
    Ok(importer)
}

#[test]
fn frames_and_bones() {
    let importer = import_text(&scene_text()).unwrap();
    assert!(importer.is_imported());
    assert_eq!(importer.num_nodes(), 3);
    let root = importer.node(1).unwrap();
    assert_eq!(root.name, "Root");
    assert_eq!(root.num_children, 1);
    let bone = importer.node(2).unwrap();
    assert_eq!(bone.name, "Bone");
    assert_eq!(bone.parent, 1);
    assert_eq!(bone.depth, 2);
    assert_eq!(bone.transform.w_axis, Vec4::new(0.0, 2.0, 0.0, 1.0));
    assert_eq!(bone.offset, glam::Mat4::IDENTITY);
    assert!(importer.node(3).is_none());
}

#[test]
fn sub_meshes_partition_faces() {
    let importer = import_text(&scene_text()).unwrap();
    assert_eq!(importer.num_sub_meshes(), 3);
    let records: Vec<_> =
        (0..importer.num_sub_meshes()).map(|i| importer.sub_mesh(i, false).unwrap()).collect();
    // Quad face 0 (two triangles) and face 1, then the second mesh.
    let triangles: Vec<_> = records.iter().map(|r| r.faces.len()).collect();
    assert_eq!(triangles, vec![2, 1, 1]);
    let materials: Vec<_> = records.iter().map(|r| r.material).collect();
    assert_eq!(materials, vec![0, 1, 0]);
    for record in &records {
        for face in &record.faces {
            for &v in face {
                assert!((v as usize) < record.vertex_count);
            }
        }
    }
    assert_eq!(records[0].frame, 1);
    assert_eq!(records[2].frame, 0);
    assert!(importer.sub_mesh(3, false).is_err());
}

#[test]
fn normals_match_faces() {
    let importer = import_text(&scene_text()).unwrap();
    let front = importer.sub_mesh(0, false).unwrap();
    let back = importer.sub_mesh(1, false).unwrap();
    assert_eq!(front.vertex_count, 4);
    assert_eq!(back.vertex_count, 3);
    for v in 0..front.vertex_count {
        assert_eq!(front.normal(v), Some(Vec3::Z));
    }
    for v in 0..back.vertex_count {
        assert_eq!(back.normal(v), Some(Vec3::NEG_Z));
    }
    // Vertex 1 of the quad was duplicated for the back face and keeps its position.
    assert_eq!(back.position(0), Some(Vec3::X));
    assert!(importer.sub_mesh(2, false).unwrap().normal(0).is_none());
}

#[test]
fn skin_weights_are_normalized() {
    let importer = import_text(&scene_text()).unwrap();
    let front = importer.sub_mesh(0, false).unwrap();
    for v in 0..front.vertex_count {
        let weights = front.bone_weights(v).unwrap();
        let total: f32 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }
    // Vertex 0 is fully bound to the bone frame, vertex 3 falls back to the mesh frame.
    assert_eq!(front.bone_indices(0), Some([2, 0, 0, 0]));
    assert_eq!(front.bone_indices(3), Some([1, 0, 0, 0]));
    assert_eq!(front.bone_weights(3), Some([1.0, 0.0, 0.0, 0.0]));
    // The back face copy of vertex 1 inherits its influences.
    let back = importer.sub_mesh(1, false).unwrap();
    assert_eq!(back.bone_indices(0), front.bone_indices(1));
    assert_eq!(back.bone_weights(0), front.bone_weights(1));
    assert!(importer.sub_mesh(2, false).unwrap().bone_weights(0).is_none());
}

#[test]
fn materials_are_shared() {
    let importer = import_text(&scene_text()).unwrap();
    assert_eq!(importer.num_materials(), 2);
    let shared = importer.material(0).unwrap();
    assert_eq!(shared.name, "Shared");
    assert_eq!(shared.texture.as_deref(), Some("shared.png"));
    assert_eq!(shared.power, 2.0);
    assert_eq!(
        importer.material_render_method(0),
        Some((RenderMethod::PerPixelLitTextured, 1))
    );
    assert_eq!(importer.material_render_method(1), Some((RenderMethod::PlainColour, 0)));
    assert_eq!(importer.material_render_method(2), None);
}

#[test]
fn tangents_on_request() {
    let importer = import_text(&scene_text()).unwrap();
    let plain = importer.sub_mesh(0, false).unwrap();
    let lit = importer.sub_mesh(0, true).unwrap();
    assert!(plain.tangent(0).is_none());
    assert_eq!(lit.layout.stride, plain.layout.stride + 12);
    for v in 0..lit.vertex_count {
        let t = lit.tangent(v).unwrap();
        assert!((t.length() - 1.0).abs() < 1e-5);
        assert!(t.dot(lit.normal(v).unwrap()).abs() < 1e-5);
    }
    // No normals, no tangents.
    let second = importer.sub_mesh(2, true).unwrap();
    assert!(second.tangent(0).is_none());
}

#[test]
fn zero_bone_skin_is_invalid() {
    let text = "xof 0303txt 0032\n\
        Mesh { 3; 0;0;0;, 1;0;0;, 0;1;0;; 1; 3;0,1,2;; \
          XSkinMeshHeader { 1; 1; 0; } \
          SkinWeights { \"b\"; 1; 0; 1.0; 1;0;0;0;0;1;0;0;0;0;1;0;0;0;0;1;; } }";
    let mut importer = import_text(&scene_text()).unwrap();
    assert_eq!(importer.import_bytes(text.as_bytes()), Err(ImportError::InvalidData));
    assert!(!importer.is_imported());
    assert_eq!(importer.num_nodes(), 0);
    assert_eq!(importer.num_sub_meshes(), 0);
    assert_eq!(importer.num_materials(), 0);
}

#[test]
fn file_errors() {
    let mut importer = Importer::new();
    assert_eq!(importer.import_bytes(b"xog 0303txt 0032 Frame {}"), Err(ImportError::FileError));
    assert_eq!(importer.import_bytes(b"xof 0303bzip0032"), Err(ImportError::FileError));
    assert_eq!(
        importer.import_file("/nonexistent/model.x"),
        Err(ImportError::FileError)
    );
    assert!(!Importer::is_xfile("/nonexistent/model.x"));
}

#[test]
fn is_xfile_checks_magic() {
    let dir = std::env::temp_dir();
    let good = dir.join(format!("xoflib-good-{}.x", std::process::id()));
    let bad = dir.join(format!("xoflib-bad-{}.x", std::process::id()));
    std::fs::write(&good, scene_text()).unwrap();
    std::fs::write(&bad, b"not an x file").unwrap();
    assert!(Importer::is_xfile(&good));
    assert!(!Importer::is_xfile(&bad));

    let mut importer = Importer::new();
    importer.import_file(&good).unwrap();
    assert_eq!(importer.num_sub_meshes(), 3);
    assert_eq!(importer.import_file(&bad), Err(ImportError::FileError));
    std::fs::remove_file(good).ok();
    std::fs::remove_file(bad).ok();
}

/// Writes the binary token encoding.
struct BinaryWriter {
    data: Vec<u8>,
}

impl BinaryWriter {
    fn new() -> Self { Self { data: b"xof 0303bin 0032".to_vec() } }

    fn token(&mut self, id: u16) -> &mut Self {
        self.data.extend_from_slice(&id.to_le_bytes());
        self
    }

    fn name(&mut self, name: &str) -> &mut Self {
        self.token(1);
        self.data.extend_from_slice(&(name.len() as u32).to_le_bytes());
        self.data.extend_from_slice(name.as_bytes());
        self
    }

    fn string(&mut self, value: &str) -> &mut Self {
        self.token(2);
        self.data.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.extend_from_slice(value.as_bytes());
        self.token(20)
    }

    fn ints(&mut self, values: &[u32]) -> &mut Self {
        self.token(6);
        self.data.extend_from_slice(&(values.len() as u32).to_le_bytes());
        for v in values {
            self.data.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    fn floats(&mut self, values: &[f32]) -> &mut Self {
        self.token(7);
        self.data.extend_from_slice(&(values.len() as u32).to_le_bytes());
        for v in values {
            self.data.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    fn open(&mut self) -> &mut Self { self.token(10) }

    fn close(&mut self) -> &mut Self { self.token(11) }
}

#[test]
fn text_and_binary_agree() {
    let text = "xof 0303txt 0032
        Frame Body {
            FrameTransformMatrix { 1.0,0.0,0.0,0.0, 0.0,1.0,0.0,0.0, 0.0,0.0,1.0,0.0, 3.0,0.0,0.0,1.0;; }
            Mesh {
                4; 0.0;0.0;0.0;, 1.0;0.0;0.0;, 1.0;1.0;0.0;, 0.0;1.0;0.0;;
                1; 4;0,1,2,3;;
                MeshNormals { 1; 0.0;0.0;1.0;; 1; 4;0,0,0,0;; }
                MeshMaterialList {
                    1; 1; 0;;
                    Material Blue { 0.0;0.0;1.0;1.0;; 8.0; 0.5;0.5;0.5;; 0.0;0.0;0.0;;
                        TextureFilename { \"blue.png\"; } }
                }
            }
        }";

    let mut bin = BinaryWriter::new();
    bin.name("Frame").name("Body").open();
    bin.name("FrameTransformMatrix").open();
    bin.floats(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 3.0, 0.0, 0.0, 1.0]);
    bin.close();
    bin.name("Mesh").open();
    bin.ints(&[4]);
    bin.floats(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    bin.ints(&[1, 4, 0, 1, 2, 3]);
    bin.name("MeshNormals").open();
    bin.ints(&[1]).floats(&[0.0, 0.0, 1.0]).ints(&[1, 4, 0, 0, 0, 0]);
    bin.close();
    bin.name("MeshMaterialList").open();
    bin.ints(&[1, 1, 0]);
    bin.name("Material").name("Blue").open();
    bin.floats(&[0.0, 0.0, 1.0, 1.0, 8.0, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);
    bin.name("TextureFilename").open().string("blue.png").close();
    bin.close().close().close().close();

    let mut from_text = Importer::new();
    from_text.import_bytes(text.as_bytes()).unwrap();
    let mut from_binary = Importer::new();
    from_binary.import_bytes(&bin.data).unwrap();

    assert_eq!(from_text.frames(), from_binary.frames());
    assert_eq!(from_text.num_materials(), 1);
    assert_eq!(from_text.material(0), from_binary.material(0));
    assert_eq!(from_text.num_sub_meshes(), from_binary.num_sub_meshes());
    for i in 0..from_text.num_sub_meshes() {
        assert_eq!(from_text.sub_mesh(i, true).unwrap(), from_binary.sub_mesh(i, true).unwrap());
    }
    assert_eq!(from_binary.node(1).unwrap().transform.w_axis, Vec4::new(3.0, 0.0, 0.0, 1.0));
    assert_eq!(from_binary.material(0).unwrap().texture.as_deref(), Some("blue.png"));
}
