use std::{env, fs, path::PathBuf};

// Vertex layout expected by every pipeline: VertexPN
//   - binding 0, location 0: R32G32B32_SFLOAT (position)
//   - binding 0, location 1: R32G32B32_SFLOAT (normal)
const MESH_VERT: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inNormal;

layout(set = 0, binding = 0) uniform Camera { mat4 viewProj; } camera;
layout(set = 0, binding = 1) uniform Object { mat4 model; mat4 normal; } object;

layout(location = 0) out vec3 vNormal;

void main() {
    vNormal = normalize(mat3(object.normal) * inNormal);
    gl_Position = camera.viewProj * object.model * vec4(inPos, 1.0);
}
"#;

const MESH_FRAG: &str = r#"
#version 450
layout(location = 0) in vec3 vNormal;
layout(location = 0) out vec4 outColor;

const vec3 LIGHT_DIR = normalize(vec3(0.4, 0.8, 0.6));
const vec3 BASE = vec3(0.75, 0.72, 0.68);

void main() {
    float lambert = max(dot(normalize(vNormal), LIGHT_DIR), 0.0);
    outColor = vec4(BASE * (0.15 + 0.85 * lambert), 1.0);
}
"#;

const WIRE_FRAG: &str = r#"
#version 450
layout(location = 0) in vec3 vNormal;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(0.1, 0.9, 0.3, 1.0);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        ("mesh.vert", shaderc::ShaderKind::Vertex, MESH_VERT),
        ("mesh.frag", shaderc::ShaderKind::Fragment, MESH_FRAG),
        ("wire.frag", shaderc::ShaderKind::Fragment, WIRE_FRAG),
    ];
    for (name, kind, src) in shaders {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("{name}: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
