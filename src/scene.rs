// =============================================================================
// SCENE - two colored quads and a fixed camera
// =============================================================================
//
// Authoring convention: right-handed world, +Y up, camera looking down -Z.
// Triangles are wound counter-clockwise as seen from the camera. The
// projection flips Y into Vulkan's Y-down clip space, which keeps that
// winding counter-clockwise in framebuffer space.

use ash::vk;
use glam::{Mat4, Vec3};

use crate::backend::mesh::Vertex;
use crate::config::CameraConfig;
use crate::renderer::ViewProjection;

/// Degrees per second of the first quad's spin
pub const ROTATION_SPEED: f32 = 20.0;

const FIRST_QUAD_DEPTH: f32 = -2.2;
const SECOND_QUAD_DEPTH: f32 = -2.9;

/// Vertices and indices for one mesh
#[derive(Debug, Clone)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Axis-aligned quad in the XY plane, two CCW triangles
pub fn quad(half_width: f32, half_height: f32, colors: [[f32; 3]; 4]) -> MeshData {
    let vertices = vec![
        Vertex::new([-half_width, half_height, 0.0], colors[0]),  // top left
        Vertex::new([-half_width, -half_height, 0.0], colors[1]), // bottom left
        Vertex::new([half_width, -half_height, 0.0], colors[2]),  // bottom right
        Vertex::new([half_width, half_height, 0.0], colors[3]),   // top right
    ];

    MeshData {
        vertices,
        indices: vec![0, 1, 2, 2, 3, 0],
    }
}

pub fn meshes() -> [MeshData; 2] {
    [
        quad(
            0.4,
            0.4,
            [
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 1.0, 0.0],
            ],
        ),
        quad(
            0.6,
            0.3,
            [
                [0.0, 0.4, 1.0],
                [0.0, 0.4, 1.0],
                [0.0, 0.4, 1.0],
                [0.0, 0.4, 1.0],
            ],
        ),
    ]
}

/// Right-handed perspective with 0..1 depth, Y flipped for Vulkan
pub fn projection(camera: &CameraConfig, extent: vk::Extent2D) -> Mat4 {
    let aspect = extent.width as f32 / extent.height.max(1) as f32;
    let mut projection = Mat4::perspective_rh(
        camera.fov_degrees.to_radians(),
        aspect,
        camera.near,
        camera.far,
    );
    projection.y_axis.y *= -1.0;
    projection
}

pub fn view(camera: &CameraConfig) -> Mat4 {
    Mat4::look_at_rh(Vec3::from(camera.eye), Vec3::ZERO, Vec3::Y)
}

pub fn view_projection(camera: &CameraConfig, extent: vk::Extent2D) -> ViewProjection {
    ViewProjection {
        projection: projection(camera, extent),
        view: view(camera),
    }
}

/// Advance the spin angle by `dt` seconds, wrapped to [0, 360)
pub fn advance_angle(angle: f32, dt: f32) -> f32 {
    (angle + ROTATION_SPEED * dt).rem_euclid(360.0)
}

/// Model matrices for the two quads at spin angle `angle` (degrees).
/// The second quad sits further back and spins three times as fast the
/// other way.
pub fn model_transforms(angle: f32) -> [Mat4; 2] {
    [
        Mat4::from_translation(Vec3::new(0.0, 0.0, FIRST_QUAD_DEPTH))
            * Mat4::from_rotation_z(angle.to_radians()),
        Mat4::from_translation(Vec3::new(0.0, 0.0, SECOND_QUAD_DEPTH))
            * Mat4::from_rotation_z((-angle * 3.0).to_radians()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 800,
            height: 600,
        }
    }

    /// Signed area in framebuffer space, using Vulkan's rasterization
    /// formula; positive means counter-clockwise
    fn framebuffer_area(points: &[Vec4]) -> f32 {
        let ndc: Vec<(f32, f32)> = points.iter().map(|p| (p.x / p.w, p.y / p.w)).collect();
        let mut sum = 0.0;
        for i in 0..ndc.len() {
            let (x0, y0) = ndc[i];
            let (x1, y1) = ndc[(i + 1) % ndc.len()];
            sum += x0 * y1 - x1 * y0;
        }
        -0.5 * sum
    }

    fn project_triangles(mesh: &MeshData, mvp: Mat4) -> Vec<[Vec4; 3]> {
        mesh.indices
            .chunks_exact(3)
            .map(|tri| {
                let corner = |i: u32| {
                    let p = mesh.vertices[i as usize].position;
                    mvp * Vec4::new(p[0], p[1], p[2], 1.0)
                };
                [corner(tri[0]), corner(tri[1]), corner(tri[2])]
            })
            .collect()
    }

    #[test]
    fn test_winding_matches_counter_clockwise_front_face() {
        let camera = CameraConfig::default();
        let vp = view_projection(&camera, extent());

        for angle in [0.0, 45.0, 170.0, 300.0] {
            for (mesh, model) in meshes().iter().zip(model_transforms(angle)) {
                let mvp = vp.projection * vp.view * model;
                for tri in project_triangles(mesh, mvp) {
                    assert!(
                        framebuffer_area(&tri) > 0.0,
                        "triangle would be culled at angle {angle}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = CameraConfig::default();
        let unflipped = Mat4::perspective_rh(
            camera.fov_degrees.to_radians(),
            800.0 / 600.0,
            camera.near,
            camera.far,
        );
        let flipped = projection(&camera, extent());
        assert_eq!(flipped.y_axis.y, -unflipped.y_axis.y);
        assert_eq!(flipped.x_axis.x, unflipped.x_axis.x);

        // A point above the camera's axis lands in the upper (negative y) half
        let clip = flipped * view(&camera) * Vec4::new(0.0, 0.5, -2.2, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_depth_range_is_zero_to_one() {
        let camera = CameraConfig::default();
        let p = projection(&camera, extent());

        let near = p * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let far = p * Vec4::new(0.0, 0.0, -camera.far, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_quads_sit_in_front_of_camera() {
        let camera = CameraConfig::default();
        let vp = view_projection(&camera, extent());

        for model in model_transforms(0.0) {
            let clip = vp.projection * vp.view * model * Vec4::new(0.0, 0.0, 0.0, 1.0);
            let depth = clip.z / clip.w;
            assert!(depth > 0.0 && depth < 1.0);
        }
    }

    #[test]
    fn test_angle_advances_and_wraps() {
        assert_eq!(advance_angle(0.0, 0.5), 10.0);
        let wrapped = advance_angle(355.0, 0.5);
        assert!((wrapped - 5.0).abs() < 1e-4);
        assert!(advance_angle(359.9, 100.0) < 360.0);
    }

    #[test]
    fn test_second_quad_spins_backwards_three_times_as_fast() {
        let [first, second] = model_transforms(30.0);

        let p = first.transform_point3(Vec3::X);
        let expected = Vec3::new(30f32.to_radians().cos(), 30f32.to_radians().sin(), FIRST_QUAD_DEPTH);
        assert!(p.abs_diff_eq(expected, 1e-5));

        // -90 degrees: +X lands on -Y
        let p = second.transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(0.0, -1.0, SECOND_QUAD_DEPTH), 1e-5));
    }

    #[test]
    fn test_meshes_are_two_quads() {
        let meshes = meshes();
        assert_eq!(meshes.len(), 2);
        for mesh in &meshes {
            assert_eq!(mesh.vertices.len(), 4);
            assert_eq!(mesh.indices.len(), 6);
            assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        }
    }
}
