// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

pub const KHRONOS_VALIDATION: &str = "VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Vk,
    Gl,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vk" | "vulkan" => Ok(Self::Vk),
            "gl" | "opengl" => Ok(Self::Gl),
            other => Err(format!("unknown backend '{other}' (expected vk|gl)")),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DrawStyle {
    Solid,
    Wireframe,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Winding {
    #[default]
    Clockwise,
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CullMode {
    #[default]
    None,
    Back,
    Front,
}

/// `[render]` table of `prism.toml`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub backend: BackendKind,
    pub clear_color: [f32; 4],
    /// Requested rasterization samples; clamped to what the device supports.
    pub msaa_samples: u32,
    pub validation_layers: Vec<String>,
    /// Draw styles, recorded in order. Each becomes its own pipeline.
    pub passes: Vec<DrawStyle>,
    pub front_face: Winding,
    pub cull_mode: CullMode,
    pub rerecord_every_frame: bool,
    /// Finite fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    pub allow_fifo_fallback: bool,
    pub pipeline_cache: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Vk,
            clear_color: [0.2, 0.2, 0.2, 1.0],
            msaa_samples: 2,
            validation_layers: if cfg!(debug_assertions) {
                vec![KHRONOS_VALIDATION.to_owned()]
            } else {
                Vec::new()
            },
            passes: vec![DrawStyle::Solid],
            front_face: Winding::Clockwise,
            cull_mode: CullMode::None,
            rerecord_every_frame: false,
            fence_timeout_ms: None,
            allow_fifo_fallback: false,
            pipeline_cache: None,
        }
    }
}

impl RenderConfig {
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map(|ms| ms.saturating_mul(1_000_000))
            .unwrap_or(u64::MAX)
    }

    pub fn is_multisampled(&self) -> bool {
        self.msaa_samples > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_engine() {
        let c = RenderConfig::default();
        assert_eq!(c.clear_color, [0.2, 0.2, 0.2, 1.0]);
        assert_eq!(c.msaa_samples, 2);
        assert_eq!(c.passes, vec![DrawStyle::Solid]);
        assert_eq!(c.front_face, Winding::Clockwise);
        assert_eq!(c.cull_mode, CullMode::None);
        assert_eq!(c.fence_timeout_ns(), u64::MAX);
        assert!(!c.allow_fifo_fallback);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let c: RenderConfig = toml::from_str(
            r#"
            backend = "gl"
            msaa_samples = 1
            passes = ["solid", "wireframe"]
            cull_mode = "back"
            fence_timeout_ms = 2000
            "#,
        )
        .unwrap();
        assert_eq!(c.backend, BackendKind::Gl);
        assert!(!c.is_multisampled());
        assert_eq!(c.passes, vec![DrawStyle::Solid, DrawStyle::Wireframe]);
        assert_eq!(c.cull_mode, CullMode::Back);
        assert_eq!(c.fence_timeout_ns(), 2_000_000_000);
        assert_eq!(c.clear_color, [0.2, 0.2, 0.2, 1.0]);
    }

    #[test]
    fn backend_from_cli_string() {
        assert_eq!("Vulkan".parse::<BackendKind>(), Ok(BackendKind::Vk));
        assert_eq!("gl".parse::<BackendKind>(), Ok(BackendKind::Gl));
        assert!("dx12".parse::<BackendKind>().is_err());
    }
}
