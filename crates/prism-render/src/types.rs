// SPDX-License-Identifier: CEPL-1.0
//! Descriptor and enum vocabulary shared by the device API and backends.

use std::borrow::Cow;

use bitflags::bitflags;
use serde::Deserialize;

use crate::handle::{Buffer, Texture};

/// Maximum color attachments on an offscreen pass.
pub const COLOR_ATTACHMENT_COUNT: usize = 4;
/// Vertex input slots a single draw can bind.
pub const DRAW_VERTEX_BUFFER_COUNT: usize = 10;
/// Live native samplers the cache may hold at once.
pub const SAMPLER_CACHE_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// Where texel (0, 0) lives for a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureOrigin {
    TopLeft,
    BottomLeft,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Off,
    #[default]
    On,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Msaa {
    #[default]
    None,
    X2,
    X4,
    X8,
}

impl Msaa {
    pub fn samples(self) -> u32 {
        match self {
            Msaa::None => 1,
            Msaa::X2 => 2,
            Msaa::X4 => 4,
            Msaa::X8 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Compute,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Usage {
    #[default]
    Static,
    Dynamic,
}

/// CPU access requested for a resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Access {
    #[default]
    None,
    Read,
    Write,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferKind {
    #[default]
    Vertex,
    Index,
    Uniform,
    Compute,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    R8,
    R16I,
    R16F,
    R32F,
    R32G32F,
    D24S8,
    D32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::R16I | PixelFormat::R16F => 2,
            PixelFormat::Rgba8 | PixelFormat::R32F | PixelFormat::D24S8 | PixelFormat::D32 => 4,
            PixelFormat::R32G32F => 8,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, PixelFormat::D24S8 | PixelFormat::D32)
    }
}

/// Vertex attribute and index element types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ElementType {
    #[default]
    Float,
    Float2,
    Float3,
    Float4,
    U8,
    U8x4,
    U8x4Norm,
    U16,
    I16,
    I32,
    U32,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::Float
            | ElementType::U8x4
            | ElementType::U8x4Norm
            | ElementType::I32
            | ElementType::U32 => 4,
            ElementType::Float2 => 8,
            ElementType::Float3 => 12,
            ElementType::Float4 => 16,
        }
    }

    pub fn components(self) -> u32 {
        match self {
            ElementType::Float2 => 2,
            ElementType::Float3 => 3,
            ElementType::Float4 | ElementType::U8x4 | ElementType::U8x4Norm => 4,
            _ => 1,
        }
    }

    pub fn normalized(self) -> bool {
        self == ElementType::U8x4Norm
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Primitive {
    Points,
    Lines,
    #[default]
    Triangles,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    Point,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TexMode {
    #[default]
    Wrap,
    Clamp,
    Border,
    Mirror,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compare {
    #[default]
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    Back,
    Front,
    FrontBack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Orientation {
    Ccw,
    Cw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Blend {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendEq {
    Add,
    Subtract,
    Min,
    Max,
}

/// Sampler state. Two descriptions are the same sampler when every field
/// matches, border color included.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub u: TexMode,
    pub v: TexMode,
    pub w: TexMode,
    pub compare: Compare,
    pub border: [f32; 4],
}

#[derive(Clone, Debug, Default)]
pub struct BufferDesc<'a> {
    pub kind: BufferKind,
    pub usage: Usage,
    pub access: Access,
    /// Size in bytes. Zero means "use the length of `data`".
    pub size: usize,
    pub data: Option<Cow<'a, [u8]>>,
}

impl<'a> BufferDesc<'a> {
    pub fn vertex(data: &'a [u8]) -> Self {
        Self {
            kind: BufferKind::Vertex,
            size: data.len(),
            data: Some(Cow::Borrowed(data)),
            ..Self::default()
        }
    }

    pub fn index(data: &'a [u8]) -> Self {
        Self {
            kind: BufferKind::Index,
            ..Self::vertex(data)
        }
    }

    pub fn into_owned(self) -> BufferDesc<'static> {
        BufferDesc {
            kind: self.kind,
            usage: self.usage,
            access: self.access,
            size: self.size,
            data: self.data.map(|d| Cow::Owned(d.into_owned())),
        }
    }
}

/// Texture extent. `height == 0 && depth == 0` is a 1D texture,
/// `depth == 0` a 2D texture, otherwise 3D.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl TextureSize {
    pub fn d2(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 0,
        }
    }

    pub fn dimensions(self) -> u8 {
        match (self.height, self.depth) {
            (0, 0) => 1,
            (_, 0) => 2,
            _ => 3,
        }
    }

    pub fn texel_count(self) -> usize {
        self.width as usize * self.height.max(1) as usize * self.depth.max(1) as usize
    }
}

#[derive(Clone, Debug, Default)]
pub struct TextureDesc<'a> {
    pub size: TextureSize,
    pub format: PixelFormat,
    pub usage: Usage,
    pub access: Access,
    pub render_target: bool,
    pub msaa: Msaa,
    /// Sampler used by plain texture binds.
    pub sampler: SamplerDesc,
    pub data: Option<Cow<'a, [u8]>>,
}

impl TextureDesc<'_> {
    pub fn into_owned(self) -> TextureDesc<'static> {
        TextureDesc {
            size: self.size,
            format: self.format,
            usage: self.usage,
            access: self.access,
            render_target: self.render_target,
            msaa: self.msaa,
            sampler: self.sampler,
            data: self.data.map(|d| Cow::Owned(d.into_owned())),
        }
    }
}

/// A region of a texture plus the texels that go in or come out of it.
#[derive(Clone, Debug, Default)]
pub struct TextureEditDesc<'a> {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bytes: Cow<'a, [u8]>,
}

impl TextureEditDesc<'_> {
    pub fn into_owned(self) -> TextureEditDesc<'static> {
        TextureEditDesc {
            x: self.x,
            y: self.y,
            z: self.z,
            width: self.width,
            height: self.height,
            depth: self.depth,
            bytes: Cow::Owned(self.bytes.into_owned()),
        }
    }

    pub fn region(&self) -> TextureRegion {
        TextureRegion {
            x: self.x,
            y: self.y,
            z: self.z,
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

/// Region for [`crate::Device::texture_read`]; output goes to a caller slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl TextureRegion {
    /// Bytes the region occupies when tightly packed.
    pub fn byte_len(&self, bytes_per_pixel: usize) -> usize {
        self.width as usize
            * self.height.max(1) as usize
            * self.depth.max(1) as usize
            * bytes_per_pixel
    }

    /// `(start, len)` byte spans of each region row inside a tightly packed
    /// texture of extent `size`, in row order.
    pub fn byte_rows(
        &self,
        size: TextureSize,
        bytes_per_pixel: usize,
    ) -> impl Iterator<Item = (usize, usize)> {
        let width = size.width as usize;
        let height = size.height.max(1) as usize;
        let row = self.width as usize * bytes_per_pixel;
        let (x, y, z) = (self.x as usize, self.y as usize, self.z as usize);
        let rows = self.height.max(1) as usize;
        (0..self.depth.max(1) as usize).flat_map(move |dz| {
            (0..rows).map(move |dy| {
                let texel = ((z + dz) * height + y + dy) * width + x;
                (texel * bytes_per_pixel, row)
            })
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProgramDesc<'a> {
    pub vertex: Cow<'a, str>,
    pub pixel: Cow<'a, str>,
    pub geometry: Option<Cow<'a, str>>,
}

impl ProgramDesc<'_> {
    pub fn into_owned(self) -> ProgramDesc<'static> {
        ProgramDesc {
            vertex: Cow::Owned(self.vertex.into_owned()),
            pixel: Cow::Owned(self.pixel.into_owned()),
            geometry: self.geometry.map(|g| Cow::Owned(g.into_owned())),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ComputeDesc<'a> {
    pub compute: Cow<'a, str>,
}

impl ComputeDesc<'_> {
    pub fn into_owned(self) -> ComputeDesc<'static> {
        ComputeDesc {
            compute: Cow::Owned(self.compute.into_owned()),
        }
    }
}

/// Fixed-function state. `Default` gives back-face culling with CCW front
/// faces, depth testing, straight alpha blending and no scissor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    pub cull: bool,
    pub cull_face: Face,
    pub cull_front: Orientation,
    pub depth: bool,
    pub blend: bool,
    pub src_rgb: Blend,
    pub dst_rgb: Blend,
    pub src_alpha: Blend,
    pub dst_alpha: Blend,
    pub eq_rgb: BlendEq,
    pub eq_alpha: BlendEq,
    pub scissor: bool,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        Self {
            cull: true,
            cull_face: Face::Back,
            cull_front: Orientation::Ccw,
            depth: true,
            blend: true,
            src_rgb: Blend::SrcAlpha,
            dst_rgb: Blend::OneMinusSrcAlpha,
            src_alpha: Blend::Zero,
            dst_alpha: Blend::One,
            eq_rgb: BlendEq::Add,
            eq_alpha: BlendEq::Add,
            scissor: false,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        /// Depth and stencil together.
        const DEPTH = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearDesc {
    pub flags: ClearFlags,
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u8,
}

impl Default for ClearDesc {
    fn default() -> Self {
        Self {
            flags: ClearFlags::COLOR | ClearFlags::DEPTH,
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInput {
    pub buffer: Buffer,
    pub element: ElementType,
    pub offset: usize,
    pub stride: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawDesc {
    pub primitive: Primitive,
    pub vertex_buffers: [Option<VertexInput>; DRAW_VERTEX_BUFFER_COUNT],
    pub index_buffer: Option<Buffer>,
    /// Defaults to `U16` when an index buffer is set.
    pub index_type: Option<ElementType>,
    pub base_element: u32,
    pub elements_count: u32,
    pub instances_count: u32,
}

impl Default for DrawDesc {
    fn default() -> Self {
        Self {
            primitive: Primitive::Triangles,
            vertex_buffers: [None; DRAW_VERTEX_BUFFER_COUNT],
            index_buffer: None,
            index_type: None,
            base_element: 0,
            elements_count: 0,
            instances_count: 1,
        }
    }
}

impl DrawDesc {
    pub fn index_type(&self) -> ElementType {
        self.index_type.unwrap_or(ElementType::U16)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassOffscreenDesc {
    pub color: [Option<Texture>; COLOR_ATTACHMENT_COUNT],
    pub depth_stencil: Option<Texture>,
}

impl PassOffscreenDesc {
    pub fn attachments(&self) -> impl Iterator<Item = Texture> + '_ {
        self.color.iter().flatten().chain(self.depth_stencil.iter()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults_match_documented_state() {
        let desc = PipelineDesc::default();
        assert!(desc.cull && desc.depth && desc.blend && !desc.scissor);
        assert_eq!(desc.cull_face, Face::Back);
        assert_eq!(desc.cull_front, Orientation::Ccw);
        assert_eq!(desc.src_rgb, Blend::SrcAlpha);
        assert_eq!(desc.dst_rgb, Blend::OneMinusSrcAlpha);
        assert_eq!((desc.src_alpha, desc.dst_alpha), (Blend::Zero, Blend::One));
    }

    #[test]
    fn sampler_equality_includes_border() {
        let a = SamplerDesc::default();
        let mut b = a;
        assert_eq!(a, b);
        b.border[3] = 1.0;
        assert_ne!(a, b);
    }

    #[test]
    fn texture_dimensions() {
        assert_eq!(TextureSize { width: 4, height: 0, depth: 0 }.dimensions(), 1);
        assert_eq!(TextureSize::d2(4, 4).dimensions(), 2);
        assert_eq!(TextureSize { width: 4, height: 4, depth: 2 }.texel_count(), 32);
    }

    #[test]
    fn region_rows_skip_to_each_line() {
        let region = TextureRegion {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
            ..TextureRegion::default()
        };
        let rows: Vec<_> = region.byte_rows(TextureSize::d2(4, 4), 1).collect();
        assert_eq!(rows, vec![(5, 2), (9, 2)]);
        assert_eq!(region.byte_len(4), 16);
    }

    #[test]
    fn owned_buffer_desc_detaches_from_caller() {
        let mut bytes = vec![1u8, 2, 3];
        let owned = BufferDesc::vertex(&bytes).into_owned();
        bytes[0] = 9;
        assert_eq!(owned.data.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
