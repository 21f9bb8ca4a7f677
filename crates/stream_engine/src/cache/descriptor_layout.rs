//! Descriptor-set layout cache
//!
//! Layouts are keyed by a structural hash of their binding list. Bindings are
//! sorted by binding index on construction so two descriptors listing the
//! same bindings in a different order hash and compare identically.

use ash::{vk, Device};

use crate::cache::{RefCache, Release};
use crate::context::{VulkanError, VulkanResult};

/// One descriptor binding inside a set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    /// Binding index inside the set
    pub binding: u32,
    /// Descriptor type bound at this index
    pub descriptor_type: vk::DescriptorType,
    /// Array size of the binding
    pub descriptor_count: u32,
    /// Shader stages that access the binding
    pub stage_flags: vk::ShaderStageFlags,
}

/// Structural key for a descriptor-set layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutDescriptor {
    bindings: Vec<LayoutBinding>,
}

impl LayoutDescriptor {
    /// Build a canonical descriptor; binding order does not matter
    pub fn new(mut bindings: Vec<LayoutBinding>) -> Self {
        bindings.sort_by_key(|b| b.binding);
        Self { bindings }
    }

    /// The bindings in canonical (sorted) order
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }
}

/// Lazily generated, reference-counted descriptor-set layouts
pub struct DescriptorLayoutCache {
    device: Device,
    cache: RefCache<LayoutDescriptor, vk::DescriptorSetLayout>,
}

impl DescriptorLayoutCache {
    /// Create an empty cache over the device
    pub fn new(device: Device) -> Self {
        Self {
            device,
            cache: RefCache::new(),
        }
    }

    /// Get or create the layout for a structural descriptor
    pub fn generate_or_get(
        &mut self,
        descriptor: &LayoutDescriptor,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let device = self.device.clone();
        self.cache
            .generate_or_get(descriptor.clone(), || create_layout(&device, descriptor))
            .copied()
    }

    /// Release one reference, destroying the layout at refcount zero
    pub fn destroy(&mut self, descriptor: &LayoutDescriptor) {
        match self.cache.release(descriptor) {
            Release::Released(layout) => unsafe {
                self.device.destroy_descriptor_set_layout(layout, None);
            },
            Release::Retained => {}
            Release::NotFound => {
                log::warn!("Release of unknown descriptor-set layout skipped");
            }
        }
    }

    /// Force-destroy every cached layout (full teardown only)
    pub fn shutdown(&mut self) {
        for layout in self.cache.drain() {
            unsafe {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }

    /// Number of live layouts
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when no layouts are cached
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn create_layout(
    device: &Device,
    descriptor: &LayoutDescriptor,
) -> VulkanResult<vk::DescriptorSetLayout> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = descriptor
        .bindings()
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(b.binding)
                .descriptor_type(b.descriptor_type)
                .descriptor_count(b.descriptor_count)
                .stage_flags(b.stage_flags)
                .build()
        })
        .collect();

    let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    unsafe {
        device
            .create_descriptor_set_layout(&create_info, None)
            .map_err(VulkanError::Api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(descriptor: &LayoutDescriptor) -> u64 {
        let mut hasher = DefaultHasher::new();
        descriptor.hash(&mut hasher);
        hasher.finish()
    }

    fn uniform(binding: u32) -> LayoutBinding {
        LayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
        }
    }

    fn sampler(binding: u32) -> LayoutBinding {
        LayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        }
    }

    #[test]
    fn test_binding_order_does_not_change_identity() {
        let a = LayoutDescriptor::new(vec![uniform(0), sampler(1)]);
        let b = LayoutDescriptor::new(vec![sampler(1), uniform(0)]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_different_bindings_differ() {
        let a = LayoutDescriptor::new(vec![uniform(0)]);
        let b = LayoutDescriptor::new(vec![sampler(0)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_bindings_are_sorted_canonically() {
        let descriptor = LayoutDescriptor::new(vec![sampler(2), uniform(0), uniform(1)]);
        let indices: Vec<u32> = descriptor.bindings().iter().map(|b| b.binding).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
