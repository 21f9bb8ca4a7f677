//! Frame packet types produced by the scene layer
//!
//! The scene/render-graph builder hands the streamer one `FramePacket` per
//! frame describing which geometries appeared, changed, or went away. The
//! streamer never parses asset files; vertex and index arrays arrive already
//! decoded.

/// Stable identifier for a mesh, assigned by the scene layer
pub type MeshId = u64;

/// 3D vertex with position, normal, and texture coordinate data
///
/// `#[repr(C)]` guarantees the layout the GPU vertex input expects; the
/// struct is `Pod` so vertex slices can be reinterpreted as bytes for
/// staging copies.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Position in 3D space
    pub position: [f32; 3],
    /// Normal vector
    pub normal: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

// Safe: Vertex contains only f32 arrays with no padding.
unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Vertex {
    /// Create a new vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }
}

/// Bytes per element in the vertex arena
pub const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

/// Bytes per element in the index arena
pub const INDEX_STRIDE: u32 = std::mem::size_of::<u32>() as u32;

/// Geometry content for one mesh in a frame packet
#[derive(Debug, Clone)]
pub struct GeometryUpdate {
    /// The mesh this content belongs to
    pub mesh_id: MeshId,
    /// Decoded vertex data
    pub vertices: Vec<Vertex>,
    /// Decoded index data
    pub indices: Vec<u32>,
}

/// Per-frame geometry changes from the scene layer
#[derive(Debug, Clone, Default)]
pub struct FramePacket {
    /// Geometries appearing for the first time
    pub added: Vec<GeometryUpdate>,
    /// Existing geometries whose content is replaced
    pub dirty: Vec<GeometryUpdate>,
    /// Geometries to drop from the arenas
    pub removed: Vec<MeshId>,
}

impl FramePacket {
    /// True when the packet carries no work at all
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dirty.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_packet_detection() {
        assert!(FramePacket::default().is_empty());

        let packet = FramePacket {
            removed: vec![3],
            ..Default::default()
        };
        assert!(!packet.is_empty());
    }

    #[test]
    fn test_vertex_stride_matches_layout() {
        // position + normal + tex_coord, tightly packed f32s
        assert_eq!(VERTEX_STRIDE, 32);
        assert_eq!(INDEX_STRIDE, 4);
    }
}
