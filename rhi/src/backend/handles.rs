//! Opaque native handles.
//!
//! Every handle is a small `Copy` enum with one variant per backend. The
//! dummy backend uses plain ids, Vulkan wraps the `ash` handle. Backends
//! unwrap their own variant through `as_dummy`/`as_vulkan` and report a
//! foreign handle as an internal error.

#[cfg(feature = "vulkan-backend")]
use ash::vk;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident => $vk:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            /// Dummy backend object id.
            Dummy(u64),
            /// Vulkan backend handle.
            #[cfg(feature = "vulkan-backend")]
            Vulkan($vk),
        }

        impl $name {
            /// Dummy id, if this handle belongs to the dummy backend.
            pub fn as_dummy(&self) -> Option<u64> {
                match self {
                    Self::Dummy(id) => Some(*id),
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan(_) => None,
                }
            }

            /// Vulkan handle, if this handle belongs to the Vulkan backend.
            #[cfg(feature = "vulkan-backend")]
            pub fn as_vulkan(&self) -> Option<$vk> {
                match self {
                    Self::Vulkan(handle) => Some(*handle),
                    Self::Dummy(_) => None,
                }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    Self::Dummy(id) => write!(f, "{}::Dummy({})", stringify!($name), id),
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan(handle) => f
                        .debug_tuple(concat!(stringify!($name), "::Vulkan"))
                        .field(handle)
                        .finish(),
                }
            }
        }
    };
}

native_handle!(
    /// Binary GPU-to-GPU semaphore.
    SemaphoreHandle => vk::Semaphore
);
native_handle!(
    /// GPU-to-CPU fence.
    FenceHandle => vk::Fence
);
native_handle!(
    /// Device memory allocation.
    MemoryHandle => vk::DeviceMemory
);
native_handle!(BufferHandle => vk::Buffer);
native_handle!(BufferViewHandle => vk::BufferView);
native_handle!(
    /// Image object backing a texture.
    TextureHandle => vk::Image
);
native_handle!(TextureViewHandle => vk::ImageView);
native_handle!(SamplerHandle => vk::Sampler);
native_handle!(ShaderModuleHandle => vk::ShaderModule);
native_handle!(DescriptorSetLayoutHandle => vk::DescriptorSetLayout);
native_handle!(
    /// Descriptor set together with the pool it was allocated from.
    DescriptorSetHandle => (vk::DescriptorPool, vk::DescriptorSet)
);
native_handle!(PipelineLayoutHandle => vk::PipelineLayout);
native_handle!(PipelineHandle => vk::Pipeline);
native_handle!(RenderPassHandle => vk::RenderPass);
native_handle!(FramebufferHandle => vk::Framebuffer);
native_handle!(CommandPoolHandle => vk::CommandPool);
native_handle!(CommandBufferHandle => vk::CommandBuffer);

/// Any native object that can carry a debug name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeObject {
    Semaphore(SemaphoreHandle),
    Fence(FenceHandle),
    Memory(MemoryHandle),
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureView(TextureViewHandle),
    Sampler(SamplerHandle),
    ShaderModule(ShaderModuleHandle),
    Pipeline(PipelineHandle),
    Framebuffer(FramebufferHandle),
    CommandBuffer(CommandBufferHandle),
}
