use std::collections::HashMap;

use uuid::{uuid, Uuid};

use crate::{
    bail_data, ensure_data,
    error::ImportError,
    format::xof::token::{tokenize_text, PrimitiveType, Token, TokenStream},
};

pub const TID_HEADER: Uuid = uuid!("3D82AB43-62DA-11cf-AB39-0020AF71E433");
pub const TID_VECTOR: Uuid = uuid!("3D82AB5E-62DA-11cf-AB39-0020AF71E433");
pub const TID_COORDS2D: Uuid = uuid!("F6F23F44-7686-11cf-8F52-0040333594A3");
pub const TID_MATRIX4X4: Uuid = uuid!("F6F23F45-7686-11cf-8F52-0040333594A3");
pub const TID_COLOR_RGBA: Uuid = uuid!("35FF44E0-6C7C-11cf-8F52-0040333594A3");
pub const TID_COLOR_RGB: Uuid = uuid!("D3E16E81-7835-11cf-8F52-0040333594A3");
pub const TID_INDEXED_COLOR: Uuid = uuid!("1630B820-7842-11cf-8F52-0040333594A3");
pub const TID_BOOLEAN: Uuid = uuid!("4885AE61-78E8-11cf-8F52-0040333594A3");
pub const TID_BOOLEAN2D: Uuid = uuid!("4885AE63-78E8-11cf-8F52-0040333594A3");
pub const TID_MATERIAL_WRAP: Uuid = uuid!("4885AE60-78E8-11cf-8F52-0040333594A3");
pub const TID_TEXTURE_FILENAME: Uuid = uuid!("A42790E1-7810-11cf-8F52-0040333594A3");
pub const TID_MATERIAL: Uuid = uuid!("3D82AB4D-62DA-11cf-AB39-0020AF71E433");
pub const TID_MESH_FACE: Uuid = uuid!("3D82AB5F-62DA-11cf-AB39-0020AF71E433");
pub const TID_MESH_FACE_WRAPS: Uuid = uuid!("4885AE62-78E8-11cf-8F52-0040333594A3");
pub const TID_MESH_TEXTURE_COORDS: Uuid = uuid!("F6F23F40-7686-11cf-8F52-0040333594A3");
pub const TID_MESH_MATERIAL_LIST: Uuid = uuid!("F6F23F42-7686-11cf-8F52-0040333594A3");
pub const TID_MESH_NORMALS: Uuid = uuid!("F6F23F43-7686-11cf-8F52-0040333594A3");
pub const TID_MESH_VERTEX_COLORS: Uuid = uuid!("1630B821-7842-11cf-8F52-0040333594A3");
pub const TID_MESH: Uuid = uuid!("3D82AB44-62DA-11cf-AB39-0020AF71E433");
pub const TID_FRAME_TRANSFORM_MATRIX: Uuid = uuid!("F6F23F41-7686-11cf-8F52-0040333594A3");
pub const TID_FRAME: Uuid = uuid!("3D82AB46-62DA-11cf-AB39-0020AF71E433");
pub const TID_FLOAT_KEYS: Uuid = uuid!("10DD46A9-775B-11cf-8F52-0040333594A3");
pub const TID_TIMED_FLOAT_KEYS: Uuid = uuid!("F406B180-7B3B-11cf-8F52-0040333594A3");
pub const TID_ANIMATION_KEY: Uuid = uuid!("10DD46A8-775B-11cf-8F52-0040333594A3");
pub const TID_ANIMATION_OPTIONS: Uuid = uuid!("E2BF56C0-840F-11cf-8F52-0040333594A3");
pub const TID_ANIMATION: Uuid = uuid!("3D82AB4F-62DA-11cf-AB39-0020AF71E433");
pub const TID_ANIMATION_SET: Uuid = uuid!("3D82AB50-62DA-11cf-AB39-0020AF71E433");
pub const TID_XSKIN_MESH_HEADER: Uuid = uuid!("3CF169CE-FF7C-44ab-93C0-F78F62D172E2");
pub const TID_VERTEX_DUPLICATION_INDICES: Uuid = uuid!("B8D65549-D7C9-4995-89CF-53A9A8B031E3");
pub const TID_SKIN_WEIGHTS: Uuid = uuid!("6F0D123B-BAD2-4167-A0D0-80224F25FABB");
pub const TID_FACE_ADJACENCY: Uuid = uuid!("A64C844A-E282-4756-8B80-250CDE04398C");
pub const TID_ANIM_TICKS_PER_SECOND: Uuid = uuid!("9E415A43-7BA6-4a73-8743-B73D47E88476");
pub const TID_FVF_DATA: Uuid = uuid!("B6E70A0E-8EF9-4e83-94AD-ECC8B0C04897");
pub const TID_EFFECT_INSTANCE: Uuid = uuid!("E331F7E4-0559-4cc2-8E99-1CEC1657928F");
pub const TID_EFFECT_PARAM_FLOATS: Uuid = uuid!("3014B9A0-62F5-478c-9B86-E4AC9F4E418B");
pub const TID_EFFECT_PARAM_STRING: Uuid = uuid!("1DBC4C88-94C1-46ee-9076-2C28818C9481");
pub const TID_EFFECT_PARAM_DWORD: Uuid = uuid!("E13963BC-AE51-4c5d-B00F-CFA3A9D97CE5");

/// Retained-mode and mesh templates.
const STANDARD_TEMPLATES: &str = r#"
template Header { <3D82AB43-62DA-11cf-AB39-0020AF71E433>
    WORD major; WORD minor; DWORD flags; }
template Vector { <3D82AB5E-62DA-11cf-AB39-0020AF71E433>
    FLOAT x; FLOAT y; FLOAT z; }
template Coords2d { <F6F23F44-7686-11cf-8F52-0040333594A3>
    FLOAT u; FLOAT v; }
template Matrix4x4 { <F6F23F45-7686-11cf-8F52-0040333594A3>
    array FLOAT matrix[16]; }
template ColorRGBA { <35FF44E0-6C7C-11cf-8F52-0040333594A3>
    FLOAT red; FLOAT green; FLOAT blue; FLOAT alpha; }
template ColorRGB { <D3E16E81-7835-11cf-8F52-0040333594A3>
    FLOAT red; FLOAT green; FLOAT blue; }
template IndexedColor { <1630B820-7842-11cf-8F52-0040333594A3>
    DWORD index; ColorRGBA indexColor; }
template Boolean { <4885AE61-78E8-11cf-8F52-0040333594A3>
    WORD truefalse; }
template Boolean2d { <4885AE63-78E8-11cf-8F52-0040333594A3>
    Boolean u; Boolean v; }
template MaterialWrap { <4885AE60-78E8-11cf-8F52-0040333594A3>
    Boolean u; Boolean v; }
template TextureFilename { <A42790E1-7810-11cf-8F52-0040333594A3>
    STRING filename; }
template Material { <3D82AB4D-62DA-11cf-AB39-0020AF71E433>
    ColorRGBA faceColor; FLOAT power; ColorRGB specularColor; ColorRGB emissiveColor; [...] }
template MeshFace { <3D82AB5F-62DA-11cf-AB39-0020AF71E433>
    DWORD nFaceVertexIndices; array DWORD faceVertexIndices[nFaceVertexIndices]; }
template MeshFaceWraps { <4885AE62-78E8-11cf-8F52-0040333594A3>
    DWORD nFaceWrapValues; array Boolean2d faceWrapValues[nFaceWrapValues]; }
template MeshTextureCoords { <F6F23F40-7686-11cf-8F52-0040333594A3>
    DWORD nTextureCoords; array Coords2d textureCoords[nTextureCoords]; }
template MeshMaterialList { <F6F23F42-7686-11cf-8F52-0040333594A3>
    DWORD nMaterials; DWORD nFaceIndexes; array DWORD faceIndexes[nFaceIndexes];
    [Material <3D82AB4D-62DA-11cf-AB39-0020AF71E433>] }
template MeshNormals { <F6F23F43-7686-11cf-8F52-0040333594A3>
    DWORD nNormals; array Vector normals[nNormals];
    DWORD nFaceNormals; array MeshFace faceNormals[nFaceNormals]; }
template MeshVertexColors { <1630B821-7842-11cf-8F52-0040333594A3>
    DWORD nVertexColors; array IndexedColor vertexColors[nVertexColors]; }
template Mesh { <3D82AB44-62DA-11cf-AB39-0020AF71E433>
    DWORD nVertices; array Vector vertices[nVertices];
    DWORD nFaces; array MeshFace faces[nFaces]; [...] }
template FrameTransformMatrix { <F6F23F41-7686-11cf-8F52-0040333594A3>
    Matrix4x4 frameMatrix; }
template Frame { <3D82AB46-62DA-11cf-AB39-0020AF71E433>
    [...] }
template FloatKeys { <10DD46A9-775B-11cf-8F52-0040333594A3>
    DWORD nValues; array FLOAT values[nValues]; }
template TimedFloatKeys { <F406B180-7B3B-11cf-8F52-0040333594A3>
    DWORD time; FloatKeys tfkeys; }
template AnimationKey { <10DD46A8-775B-11cf-8F52-0040333594A3>
    DWORD keyType; DWORD nKeys; array TimedFloatKeys keys[nKeys]; }
template AnimationOptions { <E2BF56C0-840F-11cf-8F52-0040333594A3>
    DWORD openclosed; DWORD positionquality; }
template Animation { <3D82AB4F-62DA-11cf-AB39-0020AF71E433>
    [...] }
template AnimationSet { <3D82AB50-62DA-11cf-AB39-0020AF71E433>
    [Animation <3D82AB4F-62DA-11cf-AB39-0020AF71E433>] }
"#;

/// Skinned mesh templates.
const SKIN_TEMPLATES: &str = r#"
template XSkinMeshHeader { <3CF169CE-FF7C-44ab-93C0-F78F62D172E2>
    WORD nMaxSkinWeightsPerVertex; WORD nMaxSkinWeightsPerFace; WORD nBones; }
template VertexDuplicationIndices { <B8D65549-D7C9-4995-89CF-53A9A8B031E3>
    DWORD nIndices; DWORD nOriginalVertices; array DWORD indices[nIndices]; }
template SkinWeights { <6F0D123B-BAD2-4167-A0D0-80224F25FABB>
    STRING transformNodeName; DWORD nWeights;
    array DWORD vertexIndices[nWeights]; array FLOAT weights[nWeights];
    Matrix4x4 matrixOffset; }
"#;

/// Extended templates introduced with the effect framework.
const EXTENDED_TEMPLATES: &str = r#"
template FaceAdjacency { <A64C844A-E282-4756-8B80-250CDE04398C>
    DWORD nIndices; array DWORD indices[nIndices]; }
template AnimTicksPerSecond { <9E415A43-7BA6-4a73-8743-B73D47E88476>
    DWORD AnimTicksPerSecond; }
template FVFData { <B6E70A0E-8EF9-4e83-94AD-ECC8B0C04897>
    DWORD dwFVF; DWORD nDWords; array DWORD data[nDWords]; }
template EffectInstance { <E331F7E4-0559-4cc2-8E99-1CEC1657928F>
    STRING EffectFilename; [...] }
template EffectParamFloats { <3014B9A0-62F5-478c-9B86-E4AC9F4E418B>
    STRING ParamName; DWORD nFloats; array FLOAT Floats[nFloats]; }
template EffectParamString { <1DBC4C88-94C1-46ee-9076-2C28818C9481>
    STRING ParamName; STRING Value; }
template EffectParamDWord { <E13963BC-AE51-4c5d-B00F-CFA3A9D97CE5>
    STRING ParamName; DWORD Value; }
"#;

#[derive(Clone, Debug, PartialEq)]
pub enum MemberType {
    Primitive(PrimitiveType),
    /// Nested template, by name.
    Template(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Dimension {
    Fixed(usize),
    /// Count taken from an earlier scalar member.
    Member(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub ty: MemberType,
    pub name: String,
    /// Empty for scalars.
    pub dims: Vec<Dimension>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateRef {
    pub name: String,
    pub guid: Option<Uuid>,
}

/// Which child objects a template accepts.
#[derive(Clone, Debug, PartialEq)]
pub enum Restriction {
    Closed,
    Open,
    Restricted(Vec<TemplateRef>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub name: String,
    pub guid: Uuid,
    pub members: Vec<Member>,
    pub restriction: Restriction,
}

impl Template {
    /// Whether an object of template `child` may be nested inside this one.
    pub fn allows(&self, child: &Template) -> bool {
        match &self.restriction {
            Restriction::Closed => false,
            Restriction::Open => true,
            Restriction::Restricted(refs) => refs.iter().any(|r| match r.guid {
                Some(guid) => guid == child.guid,
                None => r.name == child.name,
            }),
        }
    }

    /// Parses one `template Name { <guid> ... }` declaration. The leading
    /// `template` keyword has already been consumed.
    pub fn parse(tokens: &mut TokenStream) -> Result<Self, ImportError> {
        let name = tokens.expect_name()?.to_string();
        tokens.expect(&Token::OBrace)?;
        let Some(guid) = tokens.accept_guid() else {
            bail_data!("Template {name} has no GUID");
        };
        let mut members = Vec::new();
        let mut restriction = Restriction::Closed;
        loop {
            match tokens.peek() {
                Some(Token::CBrace) => {
                    tokens.next_token();
                    break;
                }
                Some(Token::OBracket) => {
                    tokens.next_token();
                    restriction = parse_restriction(tokens)?;
                }
                Some(_) => members.push(parse_member(tokens)?),
                None => bail_data!("Unterminated template {name}"),
            }
        }
        Ok(Self { name, guid, members, restriction })
    }
}

fn parse_member(tokens: &mut TokenStream) -> Result<Member, ImportError> {
    let is_array = tokens.accept(&Token::Array);
    let ty = match tokens.next_token() {
        Some(Token::Primitive(ty)) => MemberType::Primitive(*ty),
        Some(Token::Name(name)) => MemberType::Template(name.clone()),
        other => bail_data!("Expected a member type, found {other:?}"),
    };
    let name = tokens.expect_name()?.to_string();
    let mut dims = Vec::new();
    while tokens.accept(&Token::OBracket) {
        let dim = match tokens.next_token() {
            Some(Token::Integer(n)) => Dimension::Fixed(*n as usize),
            Some(Token::Name(member)) => Dimension::Member(member.clone()),
            other => bail_data!("Expected an array dimension for {name}, found {other:?}"),
        };
        tokens.expect(&Token::CBracket)?;
        dims.push(dim);
    }
    ensure_data!(is_array == !dims.is_empty(), "Member {name} has mismatched array dimensions");
    tokens.expect(&Token::Semicolon)?;
    Ok(Member { ty, name, dims })
}

fn parse_restriction(tokens: &mut TokenStream) -> Result<Restriction, ImportError> {
    if tokens.accept(&Token::Dot) {
        tokens.expect(&Token::Dot)?;
        tokens.expect(&Token::Dot)?;
        tokens.expect(&Token::CBracket)?;
        return Ok(Restriction::Open);
    }
    let mut refs = Vec::new();
    loop {
        let name = tokens.expect_name()?.to_string();
        let guid = tokens.accept_guid();
        refs.push(TemplateRef { name, guid });
        if tokens.accept(&Token::CBracket) {
            break;
        }
        tokens.expect(&Token::Comma)?;
    }
    Ok(Restriction::Restricted(refs))
}

/// Known templates, looked up by name or GUID.
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
    by_name: HashMap<String, usize>,
    by_guid: HashMap<Uuid, usize>,
}

impl TemplateRegistry {
    pub fn new() -> Self { Self::default() }

    /// A registry holding the standard, skinning and extended templates.
    pub fn with_builtin() -> Result<Self, ImportError> {
        let mut registry = Self::new();
        for text in [STANDARD_TEMPLATES, SKIN_TEMPLATES, EXTENDED_TEMPLATES] {
            if registry.register_templates(text.as_bytes()).is_err() {
                log::error!("Failed to register built-in templates");
                return Err(ImportError::SystemFailure);
            }
        }
        Ok(registry)
    }

    /// Registers every template declared in a text token stream.
    pub fn register_templates(&mut self, text: &[u8]) -> Result<(), ImportError> {
        let tokens = tokenize_text(text)?;
        let mut stream = TokenStream::new(&tokens);
        while !stream.is_empty() {
            stream.expect(&Token::Template)?;
            self.register(Template::parse(&mut stream)?);
        }
        Ok(())
    }

    /// Adds a template. Redeclaring a known template with the same GUID is a
    /// no-op; a different GUID replaces the name binding.
    pub fn register(&mut self, template: Template) {
        if let Some(&index) = self.by_guid.get(&template.guid) {
            let existing = &self.templates[index];
            if existing.name != template.name {
                log::debug!(
                    "Template {} redeclared as {} with the same GUID",
                    existing.name,
                    template.name
                );
                self.by_name.insert(template.name, index);
            }
            return;
        }
        if let Some(&index) = self.by_name.get(&template.name) {
            log::warn!(
                "Template {} redeclared with GUID {} (was {})",
                template.name,
                template.guid,
                self.templates[index].guid
            );
        }
        let index = self.templates.len();
        self.by_name.insert(template.name.clone(), index);
        self.by_guid.insert(template.guid, index);
        self.templates.push(template);
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Template> {
        self.by_name.get(name).map(|&i| &self.templates[i])
    }

    pub fn find_by_guid(&self, guid: &Uuid) -> Option<&Template> {
        self.by_guid.get(guid).map(|&i| &self.templates[i])
    }

    #[inline]
    pub fn len(&self) -> usize { self.templates.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.templates.is_empty() }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builtin_templates() {
        let registry = TemplateRegistry::with_builtin().unwrap();
        let mesh = registry.find_by_name("Mesh").unwrap();
        assert_eq!(mesh.guid, TID_MESH);
        assert_eq!(mesh.restriction, Restriction::Open);
        assert_eq!(mesh.members[1], Member {
            ty: MemberType::Template("Vector".into()),
            name: "vertices".into(),
            dims: vec![Dimension::Member("nVertices".into())],
        });
        let skin = registry.find_by_guid(&TID_SKIN_WEIGHTS).unwrap();
        assert_eq!(skin.name, "SkinWeights");
        assert_eq!(registry.find_by_guid(&TID_EFFECT_PARAM_DWORD).unwrap().members.len(), 2);
    }

    #[test]
    fn restrictions() {
        let registry = TemplateRegistry::with_builtin().unwrap();
        let list = registry.find_by_guid(&TID_MESH_MATERIAL_LIST).unwrap();
        let material = registry.find_by_guid(&TID_MATERIAL).unwrap();
        let mesh = registry.find_by_guid(&TID_MESH).unwrap();
        assert!(list.allows(material));
        assert!(!list.allows(mesh));
        assert!(!registry.find_by_guid(&TID_VECTOR).unwrap().allows(mesh));
    }

    #[test]
    fn redeclaration_keeps_first() {
        let mut registry = TemplateRegistry::with_builtin().unwrap();
        let count = registry.len();
        registry
            .register_templates(
                b"template Vector { <3D82AB5E-62DA-11cf-AB39-0020AF71E433> FLOAT x; FLOAT y; FLOAT z; }",
            )
            .unwrap();
        assert_eq!(registry.len(), count);
        registry
            .register_templates(b"template Custom { <11111111-2222-3333-4444-555555555555> DWORD a; }")
            .unwrap();
        assert_eq!(registry.len(), count + 1);
    }
}
