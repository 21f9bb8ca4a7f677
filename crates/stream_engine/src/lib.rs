//! GPU geometry streaming and frame synchronization built on Vulkan
//!
//! This crate is the resource-streaming and frame-synchronization layer of a
//! real-time renderer: it moves geometry from CPU scene data into growable
//! device-local arenas, records per-frame commands against a double/triple
//! buffered swapchain, and coordinates cross-queue transfers with fences,
//! binary semaphores and a timeline semaphore.
//!
//! The per-frame driver loop is expected to run:
//! `update → wait → bind → draw → submit_frame → go_to_next_frame`.
//!
//! Scene management, asset decoding, windowing and shader compilation live
//! outside this crate and are consumed through narrow interfaces
//! ([`FramePacket`](streamer::FramePacket), raw window handles, queue infos,
//! decoded pixel data).

/// Device buffer management
pub mod buffer;
/// Reference-counted GPU object caches
pub mod cache;
/// Command pool and one-time command recording
pub mod commands;
/// Configuration system
pub mod config;
/// Device context and per-frame resources
pub mod context;
/// Geometry streaming into GPU arenas
pub mod streamer;
/// Presentation surface seam
pub mod surface;
/// Swapchain management
pub mod swapchain;
/// Synchronization primitives
pub mod sync;

pub use buffer::DeviceBuffer;
pub use cache::{
    CachedPipeline, DescriptorLayoutCache, LayoutBinding, LayoutDescriptor, PipelineCache,
    PipelineDescriptor, RenderPassCache, RenderPassDescriptor, Texture, TextureCache,
    TextureDescriptor,
};
pub use commands::{CommandPool, CommandRecorder};
pub use config::{Config, ConfigError, RendererConfig};
pub use context::{DeviceContext, FrameSlot, QueueInfo, TransferQueue, VulkanError, VulkanResult};
pub use streamer::{
    FramePacket, GeometryStreamer, GeometryUpdate, MeshId, MeshProxy, ProxyHandle, Vertex,
};
pub use surface::Surface;
pub use swapchain::{Acquire, SwapchainManager};
pub use sync::{Fence, MemoryBarrierBuilder, Semaphore, TimelineSemaphore};
