//! Binary glTF 2.0 container.
//!
//! The JSON document is a [`gltf_json::Root`]; this module packs the binary
//! chunk (float positions and colours, texture coordinates, `u32` indices,
//! embedded PNG textures) and frames both chunks. The reader parses the
//! same subset back so exported files can be inspected.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fusion_core::{FusionError, Result};
use gltf_json::accessor::{ComponentType, GenericComponentType, Type};
use gltf_json::buffer::{Target, View};
use gltf_json::image::MimeType;
use gltf_json::material::{PbrBaseColorFactor, PbrMetallicRoughness, StrengthFactor};
use gltf_json::mesh::{Mode, Primitive, Semantic};
use gltf_json::texture::{Info, MagFilter, MinFilter, Sampler};
use gltf_json::validation::{Checked, USize64};
use gltf_json::{Accessor, Buffer, Image, Index, Material, Mesh, Node, Root, Scene, Texture};

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// One primitive over already pushed accessors.
pub fn primitive(
    mode: Mode,
    attributes: &[(Semantic, Index<Accessor>)],
    indices: Option<Index<Accessor>>,
    material: Option<Index<Material>>,
) -> Primitive {
    Primitive {
        attributes: attributes
            .iter()
            .map(|(s, a)| (Checked::Valid(s.clone()), *a))
            .collect::<BTreeMap<_, _>>(),
        extensions: None,
        extras: Default::default(),
        indices,
        material,
        mode: Checked::Valid(mode),
        targets: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates the glTF document and the binary payload of one GLB file.
#[derive(Debug)]
pub struct GlbBuilder {
    root: Root,
    bin: Vec<u8>,
}

impl Default for GlbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GlbBuilder {
    pub fn new() -> Self {
        let mut root = Root::default();
        root.asset.generator = Some(concat!("fusion-pipeline ", env!("CARGO_PKG_VERSION")).into());
        Self {
            root,
            bin: Vec::new(),
        }
    }

    fn push_view(&mut self, bytes: &[u8], target: Option<Target>) -> Index<View> {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let view = View {
            buffer: Index::new(0),
            byte_length: USize64::from(bytes.len()),
            byte_offset: Some(USize64::from(self.bin.len())),
            byte_stride: None,
            name: None,
            target: target.map(Checked::Valid),
            extensions: None,
            extras: Default::default(),
        };
        self.bin.extend_from_slice(bytes);
        self.root.push(view)
    }

    fn push_accessor(
        &mut self,
        buffer_view: Index<View>,
        count: usize,
        component: ComponentType,
        kind: Type,
        bounds: Option<(Vec<f32>, Vec<f32>)>,
    ) -> Index<Accessor> {
        let (min, max) = match bounds {
            Some((lo, hi)) => (Some(lo.into()), Some(hi.into())),
            None => (None, None),
        };
        self.root.push(Accessor {
            buffer_view: Some(buffer_view),
            byte_offset: None,
            count: USize64::from(count),
            component_type: Checked::Valid(GenericComponentType(component)),
            extensions: None,
            extras: Default::default(),
            type_: Checked::Valid(kind),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        })
    }

    fn push_floats<const N: usize>(
        &mut self,
        data: &[[f32; N]],
        kind: Type,
        bounds: bool,
    ) -> Index<Accessor> {
        let mut bytes = Vec::with_capacity(data.len() * N * 4);
        for v in data {
            for &c in v {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
        }
        let bounds = (bounds && !data.is_empty()).then(|| {
            let mut lo = [f32::INFINITY; N];
            let mut hi = [f32::NEG_INFINITY; N];
            for v in data {
                for k in 0..N {
                    lo[k] = lo[k].min(v[k]);
                    hi[k] = hi[k].max(v[k]);
                }
            }
            (lo.to_vec(), hi.to_vec())
        });
        let view = self.push_view(&bytes, Some(Target::ArrayBuffer));
        self.push_accessor(view, data.len(), ComponentType::F32, kind, bounds)
    }

    /// `VEC3` positions, with the bounds glTF requires.
    pub fn push_positions(&mut self, data: &[[f32; 3]]) -> Index<Accessor> {
        self.push_floats(data, Type::Vec3, true)
    }

    /// `VEC3` colours in `[0, 1]`.
    pub fn push_colors(&mut self, data: &[[f32; 3]]) -> Index<Accessor> {
        self.push_floats(data, Type::Vec3, false)
    }

    pub fn push_texcoords(&mut self, data: &[[f32; 2]]) -> Index<Accessor> {
        self.push_floats(data, Type::Vec2, false)
    }

    pub fn push_indices(&mut self, data: &[u32]) -> Index<Accessor> {
        let mut bytes = Vec::with_capacity(data.len() * 4);
        for &i in data {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        let view = self.push_view(&bytes, Some(Target::ElementArrayBuffer));
        self.push_accessor(view, data.len(), ComponentType::U32, Type::Scalar, None)
    }

    /// Embed a PNG-encoded texture; returns the material that samples it.
    pub fn push_png_material(&mut self, png: &[u8], name: &str) -> Index<Material> {
        let buffer_view = self.push_view(png, None);
        let source = self.root.push(Image {
            buffer_view: Some(buffer_view),
            mime_type: Some(MimeType("image/png".into())),
            name: None,
            uri: None,
            extensions: None,
            extras: Default::default(),
        });
        if self.root.samplers.is_empty() {
            self.root.push(Sampler {
                mag_filter: Some(Checked::Valid(MagFilter::Linear)),
                min_filter: Some(Checked::Valid(MinFilter::Linear)),
                ..Default::default()
            });
        }
        let texture = self.root.push(Texture {
            name: None,
            sampler: Some(Index::new(0)),
            source,
            extensions: None,
            extras: Default::default(),
        });
        self.root.push(Material {
            name: Some(name.into()),
            pbr_metallic_roughness: PbrMetallicRoughness {
                base_color_factor: PbrBaseColorFactor::default(),
                base_color_texture: Some(Info {
                    index: texture,
                    tex_coord: 0,
                    extensions: None,
                    extras: Default::default(),
                }),
                metallic_factor: StrengthFactor(0.0),
                roughness_factor: StrengthFactor(1.0),
                ..Default::default()
            },
            double_sided: true,
            ..Default::default()
        })
    }

    /// Add a named mesh under its own root node.
    pub fn add_mesh(&mut self, name: &str, primitives: Vec<Primitive>) -> Index<Node> {
        let mesh = self.root.push(Mesh {
            extensions: None,
            extras: Default::default(),
            name: Some(name.into()),
            primitives,
            weights: None,
        });
        self.root.push(Node {
            mesh: Some(mesh),
            name: Some(name.into()),
            ..Default::default()
        })
    }

    /// Assemble the final GLB bytes.
    pub fn finish(mut self) -> std::io::Result<Vec<u8>> {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        if !self.bin.is_empty() {
            self.root.buffers = vec![Buffer {
                byte_length: USize64::from(self.bin.len()),
                name: None,
                uri: None,
                extensions: None,
                extras: Default::default(),
            }];
        }
        let nodes = (0..self.root.nodes.len())
            .map(|i| chunk_len(i).map(Index::new))
            .collect::<std::io::Result<Vec<_>>>()?;
        self.root.scenes = vec![Scene {
            extensions: None,
            extras: Default::default(),
            name: None,
            nodes,
        }];
        self.root.scene = Some(Index::new(0));

        let mut json = self.root.to_vec()?;
        while json.len() % 4 != 0 {
            json.push(b' ');
        }

        let bin_chunk = if self.bin.is_empty() { 0 } else { 8 + self.bin.len() };
        let total = 12 + 8 + json.len() + bin_chunk;
        let mut out = Vec::with_capacity(total);
        out.write_u32::<LittleEndian>(GLB_MAGIC)?;
        out.write_u32::<LittleEndian>(GLB_VERSION)?;
        out.write_u32::<LittleEndian>(chunk_len(total)?)?;
        out.write_u32::<LittleEndian>(chunk_len(json.len())?)?;
        out.write_u32::<LittleEndian>(CHUNK_JSON)?;
        out.write_all(&json)?;
        if !self.bin.is_empty() {
            out.write_u32::<LittleEndian>(chunk_len(self.bin.len())?)?;
            out.write_u32::<LittleEndian>(CHUNK_BIN)?;
            out.write_all(&self.bin)?;
        }
        Ok(out)
    }
}

fn chunk_len(n: usize) -> std::io::Result<u32> {
    u32::try_from(n).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{n} bytes exceed the 4 GiB GLB limit"),
        )
    })
}

/// Write a finished builder to `path`.
pub fn write_glb(builder: GlbBuilder, path: &Path) -> Result<()> {
    let fail = |message: String| FusionError::Serialization {
        path: path.to_path_buf(),
        message,
    };
    let bytes = builder.finish().map_err(|e| fail(e.to_string()))?;
    std::fs::write(path, &bytes).map_err(|e| fail(e.to_string()))?;
    log::debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed GLB file.
#[derive(Debug, Clone)]
pub struct GlbDocument {
    pub root: Root,
    pub bin: Vec<u8>,
}

impl GlbDocument {
    pub fn parse(bytes: &[u8]) -> std::io::Result<Self> {
        let mut rd = Cursor::new(bytes);
        let magic = rd.read_u32::<LittleEndian>()?;
        if magic != GLB_MAGIC {
            return Err(invalid(format!("bad GLB magic {magic:#010x}")));
        }
        let version = rd.read_u32::<LittleEndian>()?;
        if version != GLB_VERSION {
            return Err(invalid(format!("unsupported GLB version {version}")));
        }
        let total = rd.read_u32::<LittleEndian>()? as usize;
        if total != bytes.len() {
            return Err(invalid(format!(
                "header length {total} does not match file size {}",
                bytes.len()
            )));
        }

        let mut root = None;
        let mut bin = Vec::new();
        while (rd.position() as usize) < total {
            let len = rd.read_u32::<LittleEndian>()? as usize;
            let kind = rd.read_u32::<LittleEndian>()?;
            let mut data = vec![0u8; len];
            rd.read_exact(&mut data)?;
            match kind {
                CHUNK_JSON => root = Some(Root::from_slice(&data)?),
                CHUNK_BIN => bin = data,
                _ => {}
            }
        }
        let root = root.ok_or_else(|| invalid("GLB has no JSON chunk".into()))?;
        Ok(Self { root, bin })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let fail = |message: String| FusionError::Serialization {
            path: path.to_path_buf(),
            message,
        };
        let bytes = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
        Self::parse(&bytes).map_err(|e| fail(e.to_string()))
    }

    pub fn mesh(&self, name: &str) -> Option<&Mesh> {
        self.root
            .meshes
            .iter()
            .find(|m| m.name.as_deref() == Some(name))
    }

    fn accessor_bytes(&self, idx: Index<Accessor>) -> std::io::Result<(usize, &[u8])> {
        let acc = self
            .root
            .get(idx)
            .ok_or_else(|| invalid(format!("accessor {idx} missing")))?;
        let view_idx = acc
            .buffer_view
            .ok_or_else(|| invalid(format!("accessor {idx} has no buffer view")))?;
        let view = self
            .root
            .get(view_idx)
            .ok_or_else(|| invalid(format!("buffer view {view_idx} missing")))?;
        let base = view.byte_offset.map_or(0, |o| o.0 as usize);
        let start = base + acc.byte_offset.map_or(0, |o| o.0 as usize);
        let end = base + view.byte_length.0 as usize;
        let bytes = self
            .bin
            .get(start..end)
            .ok_or_else(|| invalid(format!("buffer view {view_idx} out of range")))?;
        Ok((acc.count.0 as usize, bytes))
    }

    /// Decode a float `VEC3` accessor.
    pub fn read_vec3(&self, idx: Index<Accessor>) -> std::io::Result<Vec<[f32; 3]>> {
        let (count, bytes) = self.accessor_bytes(idx)?;
        let mut rd = Cursor::new(bytes);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push([
                rd.read_f32::<LittleEndian>()?,
                rd.read_f32::<LittleEndian>()?,
                rd.read_f32::<LittleEndian>()?,
            ]);
        }
        Ok(out)
    }

    /// Decode a `u32` index accessor.
    pub fn read_indices(&self, idx: Index<Accessor>) -> std::io::Result<Vec<u32>> {
        let (count, bytes) = self.accessor_bytes(idx)?;
        let mut rd = Cursor::new(bytes);
        (0..count)
            .map(|_| rd.read_u32::<LittleEndian>())
            .collect()
    }

    /// All positions of a named mesh, concatenated over its primitives.
    pub fn positions(&self, mesh: &str) -> std::io::Result<Vec<[f32; 3]>> {
        let mut out = Vec::new();
        if let Some(m) = self.mesh(mesh) {
            for p in &m.primitives {
                if let Some(&acc) = p.attributes.get(&Checked::Valid(Semantic::Positions)) {
                    out.extend(self.read_vec3(acc)?);
                }
            }
        }
        Ok(out)
    }

    /// Number of triangles in a named mesh.
    pub fn triangle_count(&self, mesh: &str) -> usize {
        self.mesh(mesh)
            .map(|m| {
                m.primitives
                    .iter()
                    .filter(|p| p.mode == Checked::Valid(Mode::Triangles))
                    .filter_map(|p| p.indices)
                    .filter_map(|i| self.root.get(i))
                    .map(|a| a.count.0 as usize / 3)
                    .sum()
            })
            .unwrap_or(0)
    }
}

fn invalid(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}
