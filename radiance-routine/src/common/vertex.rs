use radiance::types::Vertex;
use wgpu::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

pub const VERTEX_POSITION_SLOT: u32 = 0;
pub const VERTEX_NORMAL_SLOT: u32 = 1;
pub const VERTEX_TANGENT_SLOT: u32 = 2;
pub const VERTEX_BITANGENT_SLOT: u32 = 3;
pub const VERTEX_UV_SLOT: u32 = 4;

static VERTEX_ATTRIBUTES: [VertexAttribute; 5] = [
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 0,
        shader_location: VERTEX_POSITION_SLOT,
    },
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 12,
        shader_location: VERTEX_NORMAL_SLOT,
    },
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 24,
        shader_location: VERTEX_TANGENT_SLOT,
    },
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 36,
        shader_location: VERTEX_BITANGENT_SLOT,
    },
    VertexAttribute {
        format: VertexFormat::Float32x2,
        offset: 48,
        shader_location: VERTEX_UV_SLOT,
    },
];

/// The single interleaved vertex buffer every geometry pass reads.
pub static VERTEX_LAYOUT: VertexBufferLayout<'static> = VertexBufferLayout {
    array_stride: std::mem::size_of::<Vertex>() as u64,
    step_mode: VertexStepMode::Vertex,
    attributes: &VERTEX_ATTRIBUTES,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_cover_the_vertex() {
        assert_eq!(VERTEX_LAYOUT.array_stride, 56);
        let last = VERTEX_ATTRIBUTES[VERTEX_ATTRIBUTES.len() - 1];
        assert_eq!(last.offset + last.format.size(), VERTEX_LAYOUT.array_stride);
        for pair in VERTEX_ATTRIBUTES.windows(2) {
            assert_eq!(pair[0].offset + pair[0].format.size(), pair[1].offset);
        }
    }
}
