// SPDX-License-Identifier: CEPL-1.0
//! Enum translation tables to GL constants.

use prism_render::{
    Blend, BlendEq, BufferKind, Compare, ElementType, Face, Filter, Orientation, PixelFormat,
    Primitive, ShaderStage, TexMode, Usage,
};

/// `(internal format, pixel format, pixel type)` for uploads and reads.
pub(crate) fn pixel_format(format: PixelFormat) -> (u32, u32, u32) {
    match format {
        PixelFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        PixelFormat::R8 => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        PixelFormat::R16I => (glow::R16I, glow::RED_INTEGER, glow::SHORT),
        PixelFormat::R16F => (glow::R16F, glow::RED, glow::HALF_FLOAT),
        PixelFormat::R32F => (glow::R32F, glow::RED, glow::FLOAT),
        PixelFormat::R32G32F => (glow::RG32F, glow::RG, glow::FLOAT),
        PixelFormat::D24S8 => (
            glow::DEPTH24_STENCIL8,
            glow::DEPTH_STENCIL,
            glow::UNSIGNED_INT_24_8,
        ),
        PixelFormat::D32 => (glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
    }
}

pub(crate) fn element_type(ty: ElementType) -> u32 {
    match ty {
        ElementType::Float | ElementType::Float2 | ElementType::Float3 | ElementType::Float4 => {
            glow::FLOAT
        }
        ElementType::U8 | ElementType::U8x4 | ElementType::U8x4Norm => glow::UNSIGNED_BYTE,
        ElementType::U16 => glow::UNSIGNED_SHORT,
        ElementType::I16 => glow::SHORT,
        ElementType::I32 => glow::INT,
        ElementType::U32 => glow::UNSIGNED_INT,
    }
}

pub(crate) fn buffer_target(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Vertex => glow::ARRAY_BUFFER,
        BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        BufferKind::Uniform => glow::UNIFORM_BUFFER,
        BufferKind::Compute => glow::SHADER_STORAGE_BUFFER,
    }
}

pub(crate) fn usage(usage: Usage) -> u32 {
    match usage {
        Usage::Static => glow::STATIC_DRAW,
        Usage::Dynamic => glow::DYNAMIC_DRAW,
    }
}

pub(crate) fn shader_stage(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Pixel => glow::FRAGMENT_SHADER,
        ShaderStage::Geometry => glow::GEOMETRY_SHADER,
        ShaderStage::Compute => glow::COMPUTE_SHADER,
    }
}

pub(crate) fn filter(filter: Filter) -> i32 {
    (match filter {
        Filter::Point => glow::NEAREST,
        Filter::Linear => glow::LINEAR,
    }) as i32
}

pub(crate) fn tex_mode(mode: TexMode) -> i32 {
    (match mode {
        TexMode::Wrap => glow::REPEAT,
        TexMode::Clamp => glow::CLAMP_TO_EDGE,
        TexMode::Border => glow::CLAMP_TO_BORDER,
        TexMode::Mirror => glow::MIRRORED_REPEAT,
    }) as i32
}

pub(crate) fn compare(compare: Compare) -> i32 {
    (match compare {
        Compare::Never => glow::NEVER,
        Compare::Less => glow::LESS,
        Compare::Equal => glow::EQUAL,
        Compare::LessEqual => glow::LEQUAL,
        Compare::Greater => glow::GREATER,
        Compare::NotEqual => glow::NOTEQUAL,
        Compare::GreaterEqual => glow::GEQUAL,
        Compare::Always => glow::ALWAYS,
    }) as i32
}

pub(crate) fn primitive(primitive: Primitive) -> u32 {
    match primitive {
        Primitive::Points => glow::POINTS,
        Primitive::Lines => glow::LINES,
        Primitive::Triangles => glow::TRIANGLES,
    }
}

pub(crate) fn face(face: Face) -> u32 {
    match face {
        Face::Back => glow::BACK,
        Face::Front => glow::FRONT,
        Face::FrontBack => glow::FRONT_AND_BACK,
    }
}

pub(crate) fn orientation(orientation: Orientation) -> u32 {
    match orientation {
        Orientation::Ccw => glow::CCW,
        Orientation::Cw => glow::CW,
    }
}

pub(crate) fn blend(blend: Blend) -> u32 {
    match blend {
        Blend::Zero => glow::ZERO,
        Blend::One => glow::ONE,
        Blend::SrcColor => glow::SRC_COLOR,
        Blend::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        Blend::DstColor => glow::DST_COLOR,
        Blend::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        Blend::SrcAlpha => glow::SRC_ALPHA,
        Blend::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
    }
}

pub(crate) fn blend_eq(eq: BlendEq) -> u32 {
    match eq {
        BlendEq::Add => glow::FUNC_ADD,
        BlendEq::Subtract => glow::FUNC_SUBTRACT,
        BlendEq::Min => glow::MIN,
        BlendEq::Max => glow::MAX,
    }
}
