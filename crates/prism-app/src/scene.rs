// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};
use prism_render::{Mesh, VertexPN};

/// Unit cube centered on the origin, one normal per face.
pub fn cube() -> Mesh {
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        // normal, u axis, v axis
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in FACES {
        let (n, u, v) = (Vec3::from(n), Vec3::from(u), Vec3::from(v));
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = (n + u * su + v * sv) * 0.5;
            vertices.push(VertexPN {
                position: p.to_array(),
                normal: n.to_array(),
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    Mesh::new(&vertices, Some(indices))
}

/// Camera circling the origin at `t` seconds.
pub fn orbit_view_proj(t: f32, aspect: f32, gl_depth: bool) -> Mat4 {
    let eye = Vec3::new(3.0 * (t * 0.5).cos(), 1.8, 3.0 * (t * 0.5).sin());
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let fov = 60f32.to_radians();
    let proj = if gl_depth {
        Mat4::perspective_rh_gl(fov, aspect, 0.1, 100.0)
    } else {
        Mat4::perspective_rh(fov, aspect, 0.1, 100.0)
    };
    proj * view
}

/// Three cubes side by side, the middle one spinning.
pub fn transforms(t: f32) -> [Mat4; 3] {
    [
        Mat4::from_translation(Vec3::new(-1.6, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(0.6)),
        Mat4::from_rotation_y(t),
        Mat4::from_translation(Vec3::new(1.6, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(0.6)),
    ]
}
