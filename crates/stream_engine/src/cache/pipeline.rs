//! Graphics pipeline cache
//!
//! Pipelines are keyed by a stable id handed out by the material system.
//! A pipeline descriptor names its render pass and descriptor-set layouts by
//! their cache keys; the handles are resolved through the sibling caches at
//! construction time, which also takes a reference on each. Destroying the
//! pipeline releases those references again.

use std::ffi::CStr;

use ash::{vk, Device};

use crate::cache::descriptor_layout::{DescriptorLayoutCache, LayoutDescriptor};
use crate::cache::render_pass::{RenderPassCache, RenderPassDescriptor};
use crate::cache::{RefCache, Release};
use crate::context::{VulkanError, VulkanResult};
use crate::streamer::VERTEX_STRIDE;

/// Everything needed to build a graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// Compiled vertex shader module (owned by the material system)
    pub vertex_shader: vk::ShaderModule,
    /// Compiled fragment shader module (owned by the material system)
    pub fragment_shader: vk::ShaderModule,
    /// Cache key of the render pass the pipeline renders into
    pub render_pass: RenderPassDescriptor,
    /// Cache keys of the descriptor-set layouts, set number = position
    pub set_layouts: Vec<LayoutDescriptor>,
    /// Size in bytes of the push-constant block (0 for none)
    pub push_constant_size: u32,
    /// Back-face culling toggle
    pub cull_backfaces: bool,
    /// Depth test/write toggle
    pub depth_test: bool,
}

/// A cached pipeline and the cache keys it holds references on
pub struct CachedPipeline {
    /// Pipeline handle
    pub pipeline: vk::Pipeline,
    /// Pipeline layout handle
    pub layout: vk::PipelineLayout,
    render_pass: RenderPassDescriptor,
    set_layouts: Vec<LayoutDescriptor>,
}

/// Lazily generated, reference-counted graphics pipelines keyed by id
pub struct PipelineCache {
    device: Device,
    cache: RefCache<u64, CachedPipeline>,
}

impl PipelineCache {
    /// Create an empty cache over the device
    pub fn new(device: Device) -> Self {
        Self {
            device,
            cache: RefCache::new(),
        }
    }

    /// Get or create the pipeline for a stable id
    ///
    /// On a miss the descriptor's render pass and set layouts are resolved
    /// (and acquired) through the sibling caches.
    pub fn generate_or_get(
        &mut self,
        id: u64,
        descriptor: &PipelineDescriptor,
        render_passes: &mut RenderPassCache,
        layouts: &mut DescriptorLayoutCache,
    ) -> VulkanResult<(vk::Pipeline, vk::PipelineLayout)> {
        let device = self.device.clone();
        self.cache
            .generate_or_get(id, || {
                let render_pass = render_passes.generate_or_get(&descriptor.render_pass)?;
                let set_layout_handles: Vec<vk::DescriptorSetLayout> = descriptor
                    .set_layouts
                    .iter()
                    .map(|l| layouts.generate_or_get(l))
                    .collect::<VulkanResult<_>>()?;

                let (pipeline, layout) =
                    create_pipeline(&device, descriptor, render_pass, &set_layout_handles)?;

                Ok(CachedPipeline {
                    pipeline,
                    layout,
                    render_pass: descriptor.render_pass,
                    set_layouts: descriptor.set_layouts.clone(),
                })
            })
            .map(|cached| (cached.pipeline, cached.layout))
    }

    /// Release one reference; at zero the pipeline and its cache references go
    pub fn destroy(
        &mut self,
        id: u64,
        render_passes: &mut RenderPassCache,
        layouts: &mut DescriptorLayoutCache,
    ) {
        match self.cache.release(&id) {
            Release::Released(cached) => {
                unsafe {
                    self.device.destroy_pipeline(cached.pipeline, None);
                    self.device.destroy_pipeline_layout(cached.layout, None);
                }
                render_passes.destroy(&cached.render_pass);
                for layout in &cached.set_layouts {
                    layouts.destroy(layout);
                }
            }
            Release::Retained => {}
            Release::NotFound => {
                log::warn!("Release of unknown pipeline {id} skipped");
            }
        }
    }

    /// Force-destroy every cached pipeline (full teardown only)
    ///
    /// Sibling caches are shut down separately; no references are released.
    pub fn shutdown(&mut self) {
        for cached in self.cache.drain() {
            unsafe {
                self.device.destroy_pipeline(cached.pipeline, None);
                self.device.destroy_pipeline_layout(cached.layout, None);
            }
        }
    }

    /// Number of live pipelines
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when no pipelines are cached
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn create_pipeline(
    device: &Device,
    descriptor: &PipelineDescriptor,
    render_pass: vk::RenderPass,
    set_layouts: &[vk::DescriptorSetLayout],
) -> VulkanResult<(vk::Pipeline, vk::PipelineLayout)> {
    let entry_point = CStr::from_bytes_with_nul(b"main\0").map_err(|_| {
        VulkanError::InitializationFailed("Invalid shader entry point".to_string())
    })?;

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(descriptor.vertex_shader)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(descriptor.fragment_shader)
            .name(entry_point)
            .build(),
    ];

    // Vertex layout matches the streamer's arena element format.
    let binding_descriptions = [vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(VERTEX_STRIDE)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build()];

    let attribute_descriptions = [
        vk::VertexInputAttributeDescription::builder()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0)
            .build(),
        vk::VertexInputAttributeDescription::builder()
            .location(1)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(12)
            .build(),
        vk::VertexInputAttributeDescription::builder()
            .location(2)
            .binding(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(24)
            .build(),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic so pipelines survive swapchain reloads.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(if descriptor.cull_backfaces {
            vk::CullModeFlags::BACK
        } else {
            vk::CullModeFlags::NONE
        })
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(descriptor.render_pass.samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(descriptor.depth_test)
        .depth_write_enable(descriptor.depth_test)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build()];

    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let push_constant_ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: descriptor.push_constant_size,
    }];

    let mut layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
    if descriptor.push_constant_size > 0 {
        layout_info = layout_info.push_constant_ranges(&push_constant_ranges);
    }
    let layout = unsafe {
        device
            .create_pipeline_layout(&layout_info, None)
            .map_err(VulkanError::Api)?
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .dynamic_state(&dynamic_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
            .map_err(|(_, err)| VulkanError::Api(err))?
    };

    Ok((pipelines[0], layout))
}
