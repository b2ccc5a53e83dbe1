// Mesh store
//
// Each mesh exclusively owns a device-local vertex buffer and index buffer,
// uploaded once through a staging buffer, plus a model transform that the
// frame update rewrites every frame.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::buffer::{upload_staged, StagingTarget};
use super::error::RendererResult;

/// Position + color, tightly packed
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position attribute (location 0)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, position) as u32)
                .build(),
            // Color attribute (location 1)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, color) as u32)
                .build(),
        ]
    }
}

/// Vertex/index buffers plus a model transform. Generic over the buffer
/// type so the upload path can be exercised with host memory.
pub struct Mesh<B> {
    vertex_buffer: B,
    index_buffer: B,
    vertex_count: u32,
    index_count: u32,
    model: Mat4,
}

impl<B> Mesh<B> {
    /// Upload `vertices` and `indices` through `staging`
    pub fn new<S>(staging: &mut S, vertices: &[Vertex], indices: &[u32]) -> RendererResult<Self>
    where
        S: StagingTarget<Buffer = B>,
    {
        let vertex_buffer = upload_staged(
            staging,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = upload_staged(
            staging,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            model: Mat4::IDENTITY,
        })
    }

    pub fn vertex_buffer(&self) -> &B {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &B {
        &self.index_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn model(&self) -> Mat4 {
        self.model
    }

    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }
}

/// Owned meshes in draw order; dropping the store releases every buffer once
pub struct MeshStore<B> {
    meshes: Vec<Mesh<B>>,
}

impl<B> MeshStore<B> {
    pub fn new() -> Self {
        Self { meshes: Vec::new() }
    }

    pub fn push(&mut self, mesh: Mesh<B>) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mesh<B>> {
        self.meshes.iter()
    }

    /// Returns false if `id` is out of range
    pub fn set_model(&mut self, id: usize, model: Mat4) -> bool {
        match self.meshes.get_mut(id) {
            Some(mesh) => {
                mesh.set_model(model);
                true
            }
            None => false,
        }
    }
}

impl<B> Default for MeshStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::tests::HostStaging;

    fn quad() -> (Vec<Vertex>, Vec<u32>) {
        let vertices = vec![
            Vertex::new([-0.4, 0.4, 0.0], [1.0, 0.0, 0.0]),
            Vertex::new([-0.4, -0.4, 0.0], [0.0, 1.0, 0.0]),
            Vertex::new([0.4, -0.4, 0.0], [0.0, 0.0, 1.0]),
            Vertex::new([0.4, 0.4, 0.0], [1.0, 1.0, 0.0]),
        ];
        (vertices, vec![0, 1, 2, 2, 3, 0])
    }

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(Vertex::binding_description().stride, 24);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].location, 1);
    }

    #[test]
    fn test_mesh_upload_round_trip() {
        let (vertices, indices) = quad();
        let mut staging = HostStaging::default();

        let mesh = Mesh::new(&mut staging, &vertices, &indices).unwrap();

        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.index_count(), 6);
        assert_eq!(
            mesh.vertex_buffer().borrow().as_slice(),
            bytemuck::cast_slice::<Vertex, u8>(&vertices)
        );
        assert_eq!(
            mesh.index_buffer().borrow().as_slice(),
            bytemuck::cast_slice::<u32, u8>(&indices)
        );

        let read_back: Vec<Vertex> = mesh
            .vertex_buffer()
            .borrow()
            .chunks_exact(std::mem::size_of::<Vertex>())
            .map(bytemuck::pod_read_unaligned::<Vertex>)
            .collect();
        assert_eq!(read_back, vertices);
        // One staging buffer per uploaded buffer
        assert_eq!(staging.staging_created, 2);
    }

    #[test]
    fn test_model_accessors() {
        let (vertices, indices) = quad();
        let mut staging = HostStaging::default();
        let mut mesh = Mesh::new(&mut staging, &vertices, &indices).unwrap();

        assert_eq!(mesh.model(), Mat4::IDENTITY);
        let model = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -2.2));
        mesh.set_model(model);
        assert_eq!(mesh.model(), model);
    }

    #[test]
    fn test_store_ignores_out_of_range_model_update() {
        let (vertices, indices) = quad();
        let mut staging = HostStaging::default();
        let mut store = MeshStore::new();
        store.push(Mesh::new(&mut staging, &vertices, &indices).unwrap());
        store.push(Mesh::new(&mut staging, &vertices, &indices).unwrap());

        let model = Mat4::from_rotation_z(1.0);
        assert!(store.set_model(1, model));
        assert!(!store.set_model(2, model));
        assert_eq!(store.iter().nth(1).unwrap().model(), model);
        assert_eq!(store.iter().next().unwrap().model(), Mat4::IDENTITY);
    }

    #[test]
    fn test_store_ids_follow_push_order() {
        let (vertices, indices) = quad();
        let mut staging = HostStaging::default();
        let mut store: MeshStore<std::cell::RefCell<Vec<u8>>> = MeshStore::default();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);

        assert_eq!(store.push(Mesh::new(&mut staging, &vertices, &indices).unwrap()), 0);
        assert_eq!(store.push(Mesh::new(&mut staging, &vertices, &indices[..3]).unwrap()), 1);
        assert!(!store.is_empty());
        assert_eq!(store.len(), 2);

        let counts: Vec<u32> = store.iter().map(Mesh::index_count).collect();
        assert_eq!(counts, vec![6, 3]);
    }
}
