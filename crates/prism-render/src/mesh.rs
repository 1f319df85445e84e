// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

/// One float-vector attribute: component count and byte offset within a vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub components: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

pub trait Vertex: Pod {
    fn layout() -> VertexLayout;
}

fn attr(components: u32, offset: usize) -> VertexAttribute {
    VertexAttribute {
        components,
        offset: offset as u32,
    }
}

macro_rules! vertex_type {
    ($name:ident { $($field:ident : [f32; $n:literal]),+ $(,)? }) => {
        #[repr(C)]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
        pub struct $name {
            $(pub $field: [f32; $n],)+
        }

        impl Vertex for $name {
            fn layout() -> VertexLayout {
                VertexLayout {
                    stride: size_of::<$name>() as u32,
                    attributes: vec![$(attr($n, offset_of!($name, $field))),+],
                }
            }
        }
    };
}

vertex_type!(VertexP { position: [f32; 3] });
vertex_type!(VertexPC {
    position: [f32; 3],
    color: [f32; 3],
});
vertex_type!(VertexPN {
    position: [f32; 3],
    normal: [f32; 3],
});
vertex_type!(VertexPTc {
    position: [f32; 3],
    tex_coord: [f32; 2],
});
vertex_type!(VertexPTcN {
    position: [f32; 3],
    tex_coord: [f32; 2],
    normal: [f32; 3],
});

/// CPU-side mesh: raw vertex bytes plus the layout they were written with.
#[derive(Clone, Debug)]
pub struct Mesh {
    layout: VertexLayout,
    vertex_bytes: Vec<u8>,
    vertex_count: u32,
    indices: Option<Vec<u32>>,
}

impl Mesh {
    pub fn new<V: Vertex>(vertices: &[V], indices: Option<Vec<u32>>) -> Self {
        Self {
            layout: V::layout(),
            vertex_bytes: bytemuck::cast_slice(vertices).to_vec(),
            vertex_count: vertices.len() as u32,
            indices,
        }
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        &self.vertex_bytes
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_follow_field_order() {
        let l = VertexPTcN::layout();
        assert_eq!(l.stride, 32);
        assert_eq!(
            l.attributes,
            vec![attr(3, 0), attr(2, 12), attr(3, 20)]
        );
        assert_eq!(VertexP::layout().stride, 12);
        assert_eq!(VertexPN::layout().attributes[1], attr(3, 12));
    }

    #[test]
    fn mesh_keeps_bytes_and_index_flag() {
        let verts = [
            VertexPC {
                position: [0.0, 1.0, 0.0],
                color: [1.0, 0.0, 0.0],
            },
            VertexPC::default(),
        ];
        let m = Mesh::new(&verts, None);
        assert_eq!(m.vertex_count(), 2);
        assert_eq!(m.vertex_bytes().len(), 2 * 24);
        assert!(!m.is_indexed());

        let m = Mesh::new(&verts, Some(vec![0, 1, 1]));
        assert_eq!(m.indices(), Some(&[0, 1, 1][..]));
        assert_eq!(m.layout(), &VertexPC::layout());
    }
}
