//! Growable device buffer arenas
//!
//! `RangeAlloc` is the CPU-side free-list allocator handing out element
//! ranges inside an arena; `GeometryArena` pairs it with the device buffer
//! holding the bytes. Capacity only ever grows: transient spikes must not
//! cause churn, so nothing here ever shrinks a buffer.

use ash::vk;

use crate::buffer::DeviceBuffer;
use crate::context::{DeviceContext, VulkanError, VulkanResult};
use crate::sync::Fence;

/// A claimed or free span of elements inside an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First element of the span
    pub offset: u32,
    /// Number of elements in the span
    pub count: u32,
}

impl Range {
    /// One-past-the-end element
    pub fn end(&self) -> u32 {
        self.offset + self.count
    }
}

/// Free-list allocator over element ranges
///
/// Claims are first-fit over the free list (kept sorted by offset and
/// coalesced), falling back to appending past the high-water mark. Releases
/// that touch the high-water mark retire back into the unclaimed tail so the
/// arena does not fragment at its end.
#[derive(Debug, Clone)]
pub struct RangeAlloc {
    capacity: u32,
    high_water: u32,
    free: Vec<Range>,
}

impl RangeAlloc {
    /// Create an allocator over `capacity` elements, all unclaimed
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            high_water: 0,
            free: Vec::new(),
        }
    }

    /// Total element capacity
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// One past the highest claimed element; live data lives below this
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    /// Elements sitting on the free list (excludes the unclaimed tail)
    pub fn free_total(&self) -> u32 {
        self.free.iter().map(|r| r.count).sum()
    }

    /// Worst-case capacity needed to satisfy `incoming` more elements
    pub fn required_capacity(&self, incoming: u32) -> u32 {
        self.high_water.saturating_add(incoming)
    }

    /// Raise the capacity; shrinking is not representable
    pub fn grow(&mut self, new_capacity: u32) {
        debug_assert!(new_capacity >= self.capacity);
        if new_capacity > self.capacity {
            self.capacity = new_capacity;
        }
    }

    /// Claim a contiguous range of `count` elements
    ///
    /// First-fit over the free list, else append at the high-water mark.
    /// Returns `None` when the arena is too small (the caller grows first).
    pub fn claim(&mut self, count: u32) -> Option<Range> {
        if count == 0 {
            return Some(Range { offset: 0, count: 0 });
        }

        for i in 0..self.free.len() {
            if self.free[i].count >= count {
                let offset = self.free[i].offset;
                if self.free[i].count == count {
                    self.free.remove(i);
                } else {
                    self.free[i].offset += count;
                    self.free[i].count -= count;
                }
                return Some(Range { offset, count });
            }
        }

        if self.high_water.checked_add(count)? <= self.capacity {
            let offset = self.high_water;
            self.high_water += count;
            return Some(Range { offset, count });
        }

        None
    }

    /// Return a claimed range to the free list, coalescing with neighbors
    pub fn release(&mut self, range: Range) {
        if range.count == 0 {
            return;
        }
        debug_assert!(range.end() <= self.high_water);

        let pos = self.free.partition_point(|r| r.offset < range.offset);
        self.free.insert(pos, range);

        if pos + 1 < self.free.len() && self.free[pos].end() == self.free[pos + 1].offset {
            self.free[pos].count += self.free[pos + 1].count;
            self.free.remove(pos + 1);
        }
        if pos > 0 && self.free[pos - 1].end() == self.free[pos].offset {
            self.free[pos - 1].count += self.free[pos].count;
            self.free.remove(pos);
        }

        // Free ranges touching the high-water mark retire into the tail.
        while let Some(last) = self.free.last() {
            if last.end() == self.high_water {
                self.high_water = last.offset;
                self.free.pop();
            } else {
                break;
            }
        }
    }
}

/// Device-side arena: a growable GPU buffer addressed in fixed-size elements
pub struct GeometryArena {
    buffer: DeviceBuffer,
    stride: u32,
    usage: vk::BufferUsageFlags,
}

impl GeometryArena {
    /// Allocate the arena buffer for `capacity` elements of `stride` bytes
    ///
    /// Transfer-src/dst usage is always added: the arena is filled by staging
    /// copies and preserved across growth by buffer-to-buffer copies.
    pub fn new(
        allocator: &vk_mem::Allocator,
        capacity: u32,
        stride: u32,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let usage = usage | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer = DeviceBuffer::new(
            allocator,
            vk::DeviceSize::from(capacity) * vk::DeviceSize::from(stride),
            usage,
            false,
        )?;

        Ok(Self {
            buffer,
            stride,
            usage,
        })
    }

    /// Get the arena buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Bytes per element
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Byte offset of an element index
    pub fn byte_offset(&self, element: u32) -> vk::DeviceSize {
        vk::DeviceSize::from(element) * vk::DeviceSize::from(self.stride)
    }

    /// Reallocate to `new_capacity` elements, preserving `live` elements
    ///
    /// Live contents are carried over with a blocking GPU copy recorded on
    /// the graphics-family transient pool (a transfer-capable pool is not
    /// guaranteed to exist, the graphics queue always is).
    pub fn grow(
        &mut self,
        ctx: &DeviceContext,
        fence: &Fence,
        new_capacity: u32,
        live: u32,
    ) -> VulkanResult<()> {
        let new_size = vk::DeviceSize::from(new_capacity) * vk::DeviceSize::from(self.stride);
        if new_size <= self.buffer.size() {
            return Err(VulkanError::InvalidOperation {
                reason: "Arena buffers never shrink".to_string(),
            });
        }

        let new_buffer = DeviceBuffer::new(ctx.allocator(), new_size, self.usage, false)?;

        if live > 0 {
            let pool = ctx.upload_pool();
            let mut recorder = pool.begin_single_time()?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: self.byte_offset(live),
            };
            recorder.cmd_copy_buffer(self.buffer.handle(), new_buffer.handle(), &[region]);
            let command_buffer = recorder.end()?;
            pool.submit_single_time(command_buffer, ctx.queues().graphics_queue, fence)?;
        }

        let old = std::mem::replace(&mut self.buffer, new_buffer);
        old.destroy(ctx.allocator());
        Ok(())
    }

    /// Destroy the arena buffer
    pub fn destroy(self, allocator: &vk_mem::Allocator) {
        self.buffer.destroy(allocator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_append_sequentially() {
        let mut alloc = RangeAlloc::new(64);
        assert_eq!(alloc.claim(4), Some(Range { offset: 0, count: 4 }));
        assert_eq!(alloc.claim(3), Some(Range { offset: 4, count: 3 }));
        assert_eq!(alloc.high_water(), 7);
    }

    #[test]
    fn test_exact_fit_reuse() {
        let mut alloc = RangeAlloc::new(64);
        let a = alloc.claim(4).unwrap();
        let _b = alloc.claim(3).unwrap();
        alloc.release(a);
        // The freed range is preferred over appending.
        assert_eq!(alloc.claim(4), Some(Range { offset: 0, count: 4 }));
        assert_eq!(alloc.high_water(), 7);
    }

    #[test]
    fn test_partial_fit_splits_free_range() {
        let mut alloc = RangeAlloc::new(64);
        let a = alloc.claim(8).unwrap();
        let _b = alloc.claim(4).unwrap();
        alloc.release(a);
        assert_eq!(alloc.claim(3), Some(Range { offset: 0, count: 3 }));
        assert_eq!(alloc.free_total(), 5);
    }

    #[test]
    fn test_adjacent_releases_coalesce() {
        let mut alloc = RangeAlloc::new(64);
        let a = alloc.claim(4).unwrap();
        let b = alloc.claim(4).unwrap();
        let _c = alloc.claim(4).unwrap();
        alloc.release(a);
        alloc.release(b);
        // [0,8) coalesced into one range a larger claim can use.
        assert_eq!(alloc.claim(8), Some(Range { offset: 0, count: 8 }));
    }

    #[test]
    fn test_release_at_high_water_retires_tail() {
        let mut alloc = RangeAlloc::new(64);
        let a = alloc.claim(4).unwrap();
        let b = alloc.claim(4).unwrap();
        alloc.release(b);
        assert_eq!(alloc.high_water(), 4);
        alloc.release(a);
        assert_eq!(alloc.high_water(), 0);
        assert_eq!(alloc.free_total(), 0);
    }

    #[test]
    fn test_claim_fails_when_full() {
        let mut alloc = RangeAlloc::new(8);
        assert!(alloc.claim(8).is_some());
        assert_eq!(alloc.claim(1), None);
        alloc.grow(16);
        assert_eq!(alloc.claim(1), Some(Range { offset: 8, count: 1 }));
    }

    #[test]
    fn test_first_fit_prefers_lowest_offset() {
        let mut alloc = RangeAlloc::new(64);
        let a = alloc.claim(4).unwrap();
        let _b = alloc.claim(4).unwrap();
        let c = alloc.claim(4).unwrap();
        let _d = alloc.claim(4).unwrap();
        alloc.release(a);
        alloc.release(c);
        assert_eq!(alloc.claim(2), Some(Range { offset: 0, count: 2 }));
        assert_eq!(alloc.claim(4), Some(Range { offset: 8, count: 4 }));
    }

    #[test]
    fn test_zero_count_claims_are_trivial() {
        let mut alloc = RangeAlloc::new(8);
        assert_eq!(alloc.claim(0), Some(Range { offset: 0, count: 0 }));
        alloc.release(Range { offset: 0, count: 0 });
        assert_eq!(alloc.high_water(), 0);
    }

    #[test]
    fn test_required_capacity_is_worst_case() {
        let mut alloc = RangeAlloc::new(16);
        let _ = alloc.claim(10);
        assert_eq!(alloc.required_capacity(10), 20);
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let mut alloc = RangeAlloc::new(16);
        alloc.grow(32);
        assert_eq!(alloc.capacity(), 32);
        alloc.grow(32);
        assert_eq!(alloc.capacity(), 32);
    }
}
