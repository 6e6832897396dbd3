use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    bail_data, ensure_data,
    error::ImportError,
    format::xof::{
        template::{Dimension, Member, MemberType, Template, TemplateRegistry},
        token::{tokenize_binary, tokenize_text, PrimitiveType, Token, TokenStream},
        XofEncoding, XofHeader,
    },
};

/// Objects nested deeper than this are rejected.
const MAX_DEPTH: usize = 256;

#[derive(Clone, Debug)]
enum ChildRef {
    Object(usize),
    Reference { name: Option<String>, guid: Option<Uuid> },
}

#[derive(Clone, Debug)]
struct ObjectNode {
    template_guid: Uuid,
    template_name: String,
    name: String,
    guid: Option<Uuid>,
    data: Vec<u8>,
    pending: Vec<ChildRef>,
    children: Vec<usize>,
}

/// A parsed `.X` file: every data object, packed, with references resolved.
///
/// Objects live in one arena. A parent always precedes its inline children.
#[derive(Clone, Debug)]
pub struct XofFile {
    encoding: XofEncoding,
    objects: Vec<ObjectNode>,
    roots: Vec<usize>,
}

impl XofFile {
    /// Parses a complete file, header included. Templates declared in the
    /// file are added to a copy of `registry`.
    pub fn parse(data: &[u8], registry: &TemplateRegistry) -> Result<Self, ImportError> {
        let (header, body) = XofHeader::slice(data)?;
        let encoding = header.encoding()?;
        let tokens = match encoding {
            XofEncoding::Text => tokenize_text(body)?,
            XofEncoding::Binary => tokenize_binary(body, header.float_size()?)?,
        };
        log::debug!("Read {} tokens", tokens.len());

        let mut registry = registry.clone();
        let mut stream = TokenStream::new(&tokens);
        let mut parser = ObjectParser::default();
        let mut roots = Vec::new();
        loop {
            stream.skip_separators();
            match stream.peek() {
                None => break,
                Some(Token::Template) => {
                    stream.next_token();
                    let template = Template::parse(&mut stream)?;
                    log::debug!("Declared template {} {}", template.name, template.guid);
                    registry.register(template);
                }
                Some(_) => roots.push(parser.parse_object(&registry, &mut stream, 0)?),
            }
        }

        let mut file = Self { encoding, objects: parser.objects, roots };
        file.resolve_references(&registry)?;
        file.check_acyclic()?;
        log::debug!("Parsed {} data objects ({} top level)", file.objects.len(), file.roots.len());
        Ok(file)
    }

    #[inline]
    pub fn encoding(&self) -> XofEncoding { self.encoding }

    /// Number of top-level data objects.
    #[inline]
    pub fn num_children(&self) -> usize { self.roots.len() }

    pub fn child(&self, index: usize) -> Option<XofObject<'_>> {
        self.roots.get(index).map(|&index| XofObject { file: self, index })
    }

    pub fn children(&self) -> impl Iterator<Item = XofObject<'_>> + '_ {
        self.roots.iter().map(move |&index| XofObject { file: self, index })
    }

    fn resolve_references(&mut self, registry: &TemplateRegistry) -> Result<(), ImportError> {
        let mut by_name = HashMap::new();
        let mut by_guid = HashMap::new();
        for (index, object) in self.objects.iter().enumerate() {
            if !object.name.is_empty() {
                by_name.entry(object.name.clone()).or_insert(index);
            }
            if let Some(guid) = object.guid {
                by_guid.entry(guid).or_insert(index);
            }
        }
        for index in 0..self.objects.len() {
            let pending = std::mem::take(&mut self.objects[index].pending);
            let mut children = Vec::with_capacity(pending.len());
            for child in pending {
                let target = match child {
                    ChildRef::Object(target) => target,
                    ChildRef::Reference { name, guid } => {
                        let target = guid
                            .and_then(|g| by_guid.get(&g))
                            .or_else(|| name.as_ref().and_then(|n| by_name.get(n)));
                        let Some(&target) = target else {
                            bail_data!(
                                "Unresolved reference {{ {} {} }} in {}",
                                name.as_deref().unwrap_or_default(),
                                guid.map(|g| g.to_string()).unwrap_or_default(),
                                self.objects[index].template_name
                            );
                        };
                        let parent = &self.objects[index];
                        let child = &self.objects[target];
                        if let (Some(pt), Some(ct)) = (
                            registry.find_by_guid(&parent.template_guid),
                            registry.find_by_guid(&child.template_guid),
                        ) {
                            ensure_data!(
                                pt.allows(ct),
                                "{} may not reference a {}",
                                pt.name,
                                ct.name
                            );
                        }
                        target
                    }
                };
                children.push(target);
            }
            self.objects[index].children = children;
        }
        Ok(())
    }

    /// References may not lead back into an object being visited, and no
    /// chain of children, inline or referenced, may be deeper than
    /// [`MAX_DEPTH`].
    fn check_acyclic(&self) -> Result<(), ImportError> {
        const ACTIVE: usize = usize::MAX;
        // 0 until visited, ACTIVE while on the path, then the subtree height.
        let mut heights = vec![0usize; self.objects.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();
        for start in 0..self.objects.len() {
            if heights[start] != 0 {
                continue;
            }
            heights[start] = ACTIVE;
            stack.push((start, 0));
            while let Some(top) = stack.last_mut() {
                let (index, next) = *top;
                let children = &self.objects[index].children;
                if let Some(&child) = children.get(next) {
                    top.1 += 1;
                    match heights[child] {
                        ACTIVE => bail_data!(
                            "Reference cycle through {} '{}'",
                            self.objects[child].template_name,
                            self.objects[child].name
                        ),
                        0 => {
                            heights[child] = ACTIVE;
                            stack.push((child, 0));
                        }
                        _ => {}
                    }
                    continue;
                }
                stack.pop();
                let height = 1 + children.iter().map(|&c| heights[c]).max().unwrap_or(0);
                ensure_data!(
                    height <= MAX_DEPTH,
                    "{} '{}' has children {height} levels deep, limit is {MAX_DEPTH}",
                    self.objects[index].template_name,
                    self.objects[index].name
                );
                heights[index] = height;
            }
        }
        Ok(())
    }
}

/// Borrowed view of one data object.
#[derive(Copy, Clone)]
pub struct XofObject<'a> {
    file: &'a XofFile,
    index: usize,
}

impl<'a> XofObject<'a> {
    #[inline]
    fn node(&self) -> &'a ObjectNode { &self.file.objects[self.index] }

    /// Identifies the object within its file. A referenced object has the
    /// same id wherever it is reached from.
    #[inline]
    pub fn id(&self) -> usize { self.index }

    /// GUID of the object's template.
    #[inline]
    pub fn type_guid(&self) -> Uuid { self.node().template_guid }

    #[inline]
    pub fn template_name(&self) -> &'a str { &self.node().template_name }

    /// Object name, empty when unnamed.
    #[inline]
    pub fn name(&self) -> &'a str { &self.node().name }

    #[inline]
    pub fn guid(&self) -> Option<Uuid> { self.node().guid }

    #[inline]
    pub fn num_children(&self) -> usize { self.node().children.len() }

    pub fn child(&self, index: usize) -> Option<XofObject<'a>> {
        let file = self.file;
        self.node().children.get(index).map(|&index| XofObject { file, index })
    }

    pub fn children(&self) -> impl Iterator<Item = XofObject<'a>> + 'a {
        let file = self.file;
        self.node().children.iter().map(move |&index| XofObject { file, index })
    }

    /// The object's member values packed little-endian per its template.
    #[inline]
    pub fn lock(&self) -> &'a [u8] { &self.node().data }
}

impl std::fmt::Debug for XofObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XofObject")
            .field("template", &self.template_name())
            .field("name", &self.name())
            .field("size", &self.lock().len())
            .field("children", &self.num_children())
            .finish()
    }
}

#[derive(Default)]
struct ObjectParser {
    objects: Vec<ObjectNode>,
}

impl ObjectParser {
    fn parse_object(
        &mut self,
        registry: &TemplateRegistry,
        stream: &mut TokenStream,
        depth: usize,
    ) -> Result<usize, ImportError> {
        ensure_data!(depth < MAX_DEPTH, "Objects nested deeper than {MAX_DEPTH}");
        let template_name = stream.expect_name()?;
        let Some(template) = registry.find_by_name(template_name) else {
            bail_data!("Unknown template {template_name}");
        };
        let name = stream.accept_name().unwrap_or_default().to_string();
        let mut guid = stream.accept_guid();
        stream.expect(&Token::OBrace)?;
        if guid.is_none() {
            guid = stream.accept_guid();
        }

        // Reserve the slot first so parents precede their children.
        let index = self.objects.len();
        self.objects.push(ObjectNode {
            template_guid: template.guid,
            template_name: template.name.clone(),
            name,
            guid,
            data: Vec::new(),
            pending: Vec::new(),
            children: Vec::new(),
        });

        let mut data = Vec::new();
        pack_members(registry, template, stream, &mut data, 0)?;
        self.objects[index].data = data;

        let mut pending = Vec::new();
        loop {
            stream.skip_separators();
            match stream.peek() {
                Some(Token::CBrace) => {
                    stream.next_token();
                    break;
                }
                Some(Token::OBrace) => {
                    stream.next_token();
                    let name = stream.accept_name().map(str::to_string);
                    let guid = stream.accept_guid();
                    ensure_data!(
                        name.is_some() || guid.is_some(),
                        "Empty reference in {}",
                        template.name
                    );
                    stream.expect(&Token::CBrace)?;
                    pending.push(ChildRef::Reference { name, guid });
                }
                Some(Token::Name(_)) => {
                    let child = self.parse_object(registry, stream, depth + 1)?;
                    let child_guid = self.objects[child].template_guid;
                    if let Some(child_template) = registry.find_by_guid(&child_guid) {
                        ensure_data!(
                            template.allows(child_template),
                            "{} may not contain a {}",
                            template.name,
                            child_template.name
                        );
                    }
                    pending.push(ChildRef::Object(child));
                }
                other => bail_data!("Unexpected {other:?} in {} object", template.name),
            }
        }
        self.objects[index].pending = pending;
        log::trace!(
            "{} '{}': {} bytes, {} children",
            template.name,
            self.objects[index].name,
            self.objects[index].data.len(),
            self.objects[index].pending.len()
        );
        Ok(index)
    }
}

/// Packs one instance of `template` into `out`.
fn pack_members(
    registry: &TemplateRegistry,
    template: &Template,
    stream: &mut TokenStream,
    out: &mut Vec<u8>,
    depth: usize,
) -> Result<(), ImportError> {
    ensure_data!(depth < MAX_DEPTH, "Template {} nests too deeply", template.name);
    let mut scalars: HashMap<&str, u32> = HashMap::new();
    for member in &template.members {
        let count = element_count(template, member, &scalars)?;
        match &member.ty {
            MemberType::Primitive(PrimitiveType::Void) => {}
            MemberType::Primitive(ty) => {
                for _ in 0..count {
                    let value = pack_primitive(*ty, stream, out, &member.name)?;
                    if member.dims.is_empty() {
                        if let Some(value) = value {
                            scalars.insert(member.name.as_str(), value);
                        }
                    }
                }
            }
            MemberType::Template(name) => {
                let Some(nested) = registry.find_by_name(name) else {
                    bail_data!("Member {} of {} has unknown type {name}", member.name, template.name);
                };
                for _ in 0..count {
                    let start = stream.position();
                    pack_members(registry, nested, stream, out, depth + 1)?;
                    // An element that read nothing packs nothing, and neither will the rest.
                    if stream.position() == start {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn element_count(
    template: &Template,
    member: &Member,
    scalars: &HashMap<&str, u32>,
) -> Result<usize, ImportError> {
    let mut count = 1usize;
    for dim in &member.dims {
        let n = match dim {
            Dimension::Fixed(n) => *n,
            Dimension::Member(name) => match scalars.get(name.as_str()) {
                Some(&n) => n as usize,
                None => bail_data!(
                    "Array {} of {} sized by unknown member {name}",
                    member.name,
                    template.name
                ),
            },
        };
        let Some(next) = count.checked_mul(n) else {
            bail_data!("Array {} of {} is too large", member.name, template.name);
        };
        count = next;
    }
    Ok(count)
}

/// Packs one primitive value. Returns integer values so later array members
/// can be sized by them.
fn pack_primitive(
    ty: PrimitiveType,
    stream: &mut TokenStream,
    out: &mut Vec<u8>,
    member: &str,
) -> Result<Option<u32>, ImportError> {
    stream.skip_separators();
    let token = stream.next_token();
    let value = match (ty, token) {
        (PrimitiveType::Word | PrimitiveType::SWord, Some(Token::Integer(v))) => {
            out.extend_from_slice(&(*v as u16).to_le_bytes());
            Some(*v)
        }
        (PrimitiveType::DWord | PrimitiveType::SDWord, Some(Token::Integer(v))) => {
            out.extend_from_slice(&v.to_le_bytes());
            Some(*v)
        }
        (PrimitiveType::Char | PrimitiveType::UChar, Some(Token::Integer(v))) => {
            out.push(*v as u8);
            Some(*v)
        }
        (PrimitiveType::Float, Some(Token::Float(v))) => {
            out.extend_from_slice(&(*v as f32).to_le_bytes());
            None
        }
        (PrimitiveType::Float, Some(Token::Integer(v))) => {
            out.extend_from_slice(&(*v as i32 as f32).to_le_bytes());
            None
        }
        (PrimitiveType::Double, Some(Token::Float(v))) => {
            out.extend_from_slice(&v.to_le_bytes());
            None
        }
        (PrimitiveType::Double, Some(Token::Integer(v))) => {
            out.extend_from_slice(&(*v as i32 as f64).to_le_bytes());
            None
        }
        (ty, Some(Token::String(s))) if ty.is_string() => {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
            None
        }
        (ty, token) => bail_data!("Member {member}: expected {ty:?}, found {token:?}"),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::format::xof::template::{TID_MATERIAL, TID_MESH, TID_MESH_MATERIAL_LIST};

    fn parse(text: &str) -> Result<XofFile, ImportError> {
        let registry = TemplateRegistry::with_builtin().unwrap();
        XofFile::parse(format!("xof 0303txt 0032\n{text}").as_bytes(), &registry)
    }

    fn floats(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }

    #[test]
    fn packs_nested_arrays() {
        let file = parse(
            "Mesh tri { 3; 0.0;0.0;0.0;, 1.0;0.0;0.0;, 0.0;1.0;0.0;; 1; 3;0,1,2;; }",
        )
        .unwrap();
        assert_eq!(file.num_children(), 1);
        let mesh = file.child(0).unwrap();
        assert_eq!(mesh.type_guid(), TID_MESH);
        assert_eq!(mesh.name(), "tri");
        let data = mesh.lock();
        // 4 + 3 * 12 + 4 + (4 + 3 * 4)
        assert_eq!(data.len(), 60);
        assert_eq!(&data[..4], &3u32.to_le_bytes());
        assert_eq!(floats(&data[4..40]), vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(&data[44..48], &3u32.to_le_bytes());
        assert_eq!(&data[56..60], &2u32.to_le_bytes());
    }

    #[test]
    fn references_resolve_by_name() {
        let file = parse(
            r#"
            Material red { 1.0;0.0;0.0;1.0;; 0.0; 0.0;0.0;0.0;; 0.0;0.0;0.0;; TextureFilename { "red.png"; } }
            MeshMaterialList { 1; 1; 0;; { red } }
            "#,
        )
        .unwrap();
        let list = file.child(1).unwrap();
        assert_eq!(list.type_guid(), TID_MESH_MATERIAL_LIST);
        let material = list.child(0).unwrap();
        assert_eq!(material.type_guid(), TID_MATERIAL);
        assert_eq!(material.lock().len(), 44);
        assert_eq!(material.child(0).unwrap().lock(), b"red.png\0");
    }

    #[test]
    fn in_file_templates() {
        let file = parse(
            "template Thing { <11111111-2222-3333-4444-555555555555> DWORD n; array WORD v[n]; }\n\
             Thing { 2; 7, 9; }",
        )
        .unwrap();
        let thing = file.child(0).unwrap();
        assert_eq!(thing.template_name(), "Thing");
        assert_eq!(thing.lock(), &[2, 0, 0, 0, 7, 0, 9, 0]);
    }

    #[test]
    fn rejected_inputs() {
        assert_eq!(parse("Unknown { 1; }").err(), Some(ImportError::InvalidData));
        assert_eq!(parse("MeshMaterialList { 1; 1; 0;; { missing } }").err(), Some(ImportError::InvalidData));
        assert_eq!(
            parse("MeshMaterialList { 1; 1; 0;; Mesh { 0;; 0;; } }").err(),
            Some(ImportError::InvalidData)
        );
        assert_eq!(parse("Vector { 1.0; 2.0; ").err(), Some(ImportError::InvalidData));
        assert_eq!(parse("Frame a { { a } }").err(), Some(ImportError::InvalidData));
        assert_eq!(
            parse("Frame a { { b } } Frame b { Frame c { { a } } }").err(),
            Some(ImportError::InvalidData)
        );
    }

    fn reference_chain(links: usize) -> String {
        let mut text = String::new();
        for i in 0..links {
            text.push_str(&format!("Frame f{i} {{ {{ f{} }} }}\n", i + 1));
        }
        text.push_str(&format!("Frame f{links} {{ }}\n"));
        text
    }

    #[test]
    fn reference_depth_is_limited() {
        let file = parse(&reference_chain(MAX_DEPTH - 1)).unwrap();
        let mut object = file.child(0).unwrap();
        let mut depth = 1;
        while let Some(child) = object.child(0) {
            object = child;
            depth += 1;
        }
        assert_eq!(depth, MAX_DEPTH);
        assert_eq!(object.name(), format!("f{}", MAX_DEPTH - 1));

        assert_eq!(parse(&reference_chain(MAX_DEPTH)).err(), Some(ImportError::InvalidData));
        assert_eq!(parse(&reference_chain(200_000)).err(), Some(ImportError::InvalidData));
    }

    #[test]
    fn shared_references_keep_their_id() {
        let file = parse("Frame a { { c } { c } } Frame b { { c } } Frame c { }").unwrap();
        let a = file.child(0).unwrap();
        let b = file.child(1).unwrap();
        let c = file.child(2).unwrap();
        assert_eq!(a.num_children(), 2);
        assert_eq!(a.child(0).unwrap().id(), c.id());
        assert_eq!(a.child(1).unwrap().id(), c.id());
        assert_eq!(b.child(0).unwrap().id(), c.id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn empty_elements_are_not_repeated() {
        let file = parse(
            "template Empty { <0A1B2C3D-0000-4000-8000-000000000010> }\n\
             template Holder { <0A1B2C3D-0000-4000-8000-000000000011> DWORD n; array Empty e[n]; DWORD tail; }\n\
             Holder { 4000000000; 7; }",
        )
        .unwrap();
        let holder = file.child(0).unwrap();
        let mut expected = 4_000_000_000u32.to_le_bytes().to_vec();
        expected.extend_from_slice(&7u32.to_le_bytes());
        assert_eq!(holder.lock(), expected.as_slice());

        let file = parse(
            "template Gap { <0A1B2C3D-0000-4000-8000-000000000012> DWORD n; array VOID pad[n]; WORD w; }\n\
             Gap { 4000000000; 3; }",
        )
        .unwrap();
        assert_eq!(file.child(0).unwrap().lock(), &[0x00, 0x28, 0x6B, 0xEE, 3, 0]);
    }
}
