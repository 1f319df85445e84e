// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Failures the Vulkan backend can report. Surface invalidation is not one of
/// them: it travels through [`crate::frame::AcquireStatus`] and friends.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(String),
    #[error("requested validation layer {0} is not available")]
    LayerNotPresent(String),
    #[error("required instance extension {0} is not available")]
    ExtensionNotPresent(String),
    #[error("no physical device supports graphics, present and sampler anisotropy")]
    NoSuitableDevice,
    #[error("graphics/present queue families could not be resolved")]
    NoQueueFamily,
    #[error("surface exposes no supported format")]
    NoSurfaceFormat,
    #[error("surface exposes no supported present mode")]
    NoPresentMode,
    #[error("no depth format supports optimal-tiling depth attachments")]
    NoDepthFormat,
    #[error("shader byte code is not valid SPIR-V")]
    InvalidShaderCode,
    #[error("vertex attribute with {0} components has no matching format")]
    UnsupportedVertexFormat(u32),
    #[error("mesh vertex layout does not match the pipeline layout")]
    MeshLayoutMismatch,
    #[error("graphics pipeline creation failed: {0}")]
    PipelineCreation(vk::Result),
    #[error("no uniform buffers exist for swapchain image {0}")]
    MissingUniforms(usize),
    #[error("acquire_next_image failed: {0}")]
    AcquireFailure(vk::Result),
    #[error("queue_submit failed: {0}")]
    SubmitFailure(vk::Result),
    #[error("queue_present failed: {0}")]
    PresentFailure(vk::Result),
    #[error("fence wait timed out after {timeout_ns} ns; device may be hung")]
    DeviceHangSuspected { timeout_ns: u64 },
    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error(transparent)]
    Vulkan(#[from] vk::Result),
}

pub type VkResult<T> = std::result::Result<T, VkError>;
