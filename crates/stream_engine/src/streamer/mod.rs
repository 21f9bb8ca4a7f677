//! Geometry streaming
//!
//! Moves per-frame geometry changes from CPU scene data into two growable
//! device-local arenas (vertex, index) through a reusable staging buffer.
//! When the device exposes a dedicated transfer queue, uploads run there and
//! ownership of the arenas is handed to the graphics queue with a
//! release/acquire barrier pair ordered by the context's timeline semaphore.

pub mod arena;
pub mod packet;
pub mod placement;

pub use arena::{GeometryArena, Range, RangeAlloc};
pub use packet::{FramePacket, GeometryUpdate, MeshId, Vertex, INDEX_STRIDE, VERTEX_STRIDE};
pub use placement::{MeshPlacements, MeshProxy, ProxyHandle};

use ash::{vk, Device};

use crate::buffer::DeviceBuffer;
use crate::config::RendererConfig;
use crate::context::{DeviceContext, TransferQueue, VulkanError, VulkanResult};
use crate::sync::{Fence, MemoryBarrierBuilder};

/// One staging-to-arena copy scheduled for the current pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CopyRegion {
    src_offset: u64,
    dst_offset: u64,
    size: u64,
}

impl CopyRegion {
    fn to_vk(self) -> vk::BufferCopy {
        vk::BufferCopy {
            src_offset: self.src_offset,
            dst_offset: self.dst_offset,
            size: self.size,
        }
    }
}

/// Staging layout for one geometry that survived placement
struct StagedMesh<'a> {
    vertices: &'a [Vertex],
    indices: &'a [u32],
    vertex_region: Option<CopyRegion>,
    index_region: Option<CopyRegion>,
}

/// Transient bookkeeping for one streaming pass
///
/// Created by the placement walk, consumed by the staging write and the copy
/// submission, then discarded.
struct UpdateContext<'a> {
    cursor: u64,
    staged: Vec<StagedMesh<'a>>,
}

impl<'a> UpdateContext<'a> {
    fn new() -> Self {
        Self {
            cursor: 0,
            staged: Vec::new(),
        }
    }

    fn push(&mut self, geometry: &'a GeometryUpdate, proxy: &MeshProxy) {
        let vertex_bytes = geometry.vertices.len() as u64 * u64::from(VERTEX_STRIDE);
        let vertex_region = (vertex_bytes > 0).then(|| {
            let region = CopyRegion {
                src_offset: self.cursor,
                dst_offset: u64::from(proxy.vertex_offset) * u64::from(VERTEX_STRIDE),
                size: vertex_bytes,
            };
            self.cursor += vertex_bytes;
            region
        });

        let index_bytes = geometry.indices.len() as u64 * u64::from(INDEX_STRIDE);
        let index_region = (index_bytes > 0).then(|| {
            let region = CopyRegion {
                src_offset: self.cursor,
                dst_offset: u64::from(proxy.index_offset) * u64::from(INDEX_STRIDE),
                size: index_bytes,
            };
            self.cursor += index_bytes;
            region
        });

        self.staged.push(StagedMesh {
            vertices: &geometry.vertices,
            indices: &geometry.indices,
            vertex_region,
            index_region,
        });
    }

    /// Total staging bytes the pass will write
    fn staging_bytes(&self) -> u64 {
        self.cursor
    }

    fn is_empty(&self) -> bool {
        self.staged.iter().all(|s| s.vertex_region.is_none() && s.index_region.is_none())
    }

    fn vertex_copies(&self) -> Vec<vk::BufferCopy> {
        self.staged
            .iter()
            .filter_map(|s| s.vertex_region.map(CopyRegion::to_vk))
            .collect()
    }

    fn index_copies(&self) -> Vec<vk::BufferCopy> {
        self.staged
            .iter()
            .filter_map(|s| s.index_region.map(CopyRegion::to_vk))
            .collect()
    }
}

/// Walk added-then-dirty geometries, claiming arena space and assigning
/// sequentially advancing staging offsets
fn plan_uploads<'a>(
    placements: &mut MeshPlacements,
    added: &'a [GeometryUpdate],
    dirty: &'a [GeometryUpdate],
) -> VulkanResult<UpdateContext<'a>> {
    let mut update = UpdateContext::new();

    for geometry in added {
        let proxy = placements.place_added(
            geometry.mesh_id,
            geometry.vertices.len() as u32,
            geometry.indices.len() as u32,
        )?;
        update.push(geometry, &proxy);
    }

    for geometry in dirty {
        if let Some(proxy) = placements.place_dirty(
            geometry.mesh_id,
            geometry.vertices.len() as u32,
            geometry.indices.len() as u32,
        )? {
            update.push(geometry, &proxy);
        }
    }

    Ok(update)
}

/// Streams scene geometry into GPU arenas and keeps the frame loop in sync
pub struct GeometryStreamer {
    device: Device,
    placements: MeshPlacements,
    vertex_arena: GeometryArena,
    index_arena: GeometryArena,
    staging: DeviceBuffer,
    upload_fence: Fence,
    graphics_family: u32,
    transfer: Option<TransferQueue>,
    transfer_pending: bool,
    pending_wait_value: Option<u64>,
}

impl GeometryStreamer {
    /// Allocate the staging buffer, both arenas, and the upload fence
    pub fn new(ctx: &DeviceContext, config: &RendererConfig) -> VulkanResult<Self> {
        let staging = DeviceBuffer::new(
            ctx.allocator(),
            config.staging_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            true,
        )?;
        let vertex_arena = GeometryArena::new(
            ctx.allocator(),
            config.vertex_arena_capacity,
            VERTEX_STRIDE,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_arena = GeometryArena::new(
            ctx.allocator(),
            config.index_arena_capacity,
            INDEX_STRIDE,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        let upload_fence = Fence::new(ctx.device().clone(), false)?;
        let placements =
            MeshPlacements::new(config.vertex_arena_capacity, config.index_arena_capacity);

        let transfer = ctx.queues().transfer;
        log::debug!(
            "GeometryStreamer initialized: staging {} bytes, dedicated transfer queue: {}",
            config.staging_size,
            transfer.is_some()
        );

        Ok(Self {
            device: ctx.device().clone(),
            placements,
            vertex_arena,
            index_arena,
            staging,
            upload_fence,
            graphics_family: ctx.queues().graphics_family,
            transfer,
            transfer_pending: false,
            pending_wait_value: None,
        })
    }

    /// Ingest one frame's geometry changes and schedule the device copies
    ///
    /// Removals run first (CPU-only) so their ranges are reusable by this
    /// frame's claims. The pass is a no-op when the packet is empty.
    pub fn update(&mut self, ctx: &DeviceContext, packet: &FramePacket) -> VulkanResult<()> {
        if packet.is_empty() {
            return Ok(());
        }

        for &mesh_id in &packet.removed {
            self.placements.remove(mesh_id);
        }

        let mut incoming_vertices: u32 = 0;
        let mut incoming_indices: u32 = 0;
        for geometry in packet.added.iter().chain(&packet.dirty) {
            incoming_vertices += geometry.vertices.len() as u32;
            incoming_indices += geometry.indices.len() as u32;
        }
        if incoming_vertices == 0 && incoming_indices == 0 {
            return Ok(());
        }

        self.ensure_arena_capacity(ctx, incoming_vertices, incoming_indices)?;

        let staging_required = u64::from(incoming_vertices) * u64::from(VERTEX_STRIDE)
            + u64::from(incoming_indices) * u64::from(INDEX_STRIDE);
        self.ensure_staging_capacity(ctx, staging_required)?;

        let upload = plan_uploads(&mut self.placements, &packet.added, &packet.dirty)?;
        if upload.is_empty() {
            return Ok(());
        }
        log::trace!(
            "Streaming pass: {} meshes, {} staging bytes",
            upload.staged.len(),
            upload.staging_bytes()
        );

        let mapped = self.staging.map(ctx.allocator())?;
        for staged in &upload.staged {
            if let Some(region) = staged.vertex_region {
                write_staging(mapped, region.src_offset, bytemuck::cast_slice(staged.vertices));
            }
            if let Some(region) = staged.index_region {
                write_staging(mapped, region.src_offset, bytemuck::cast_slice(staged.indices));
            }
        }
        self.staging.unmap(ctx.allocator());

        self.submit_copies(ctx, &upload)
    }

    /// Record acquire-ownership barriers before the frame's first arena read
    ///
    /// A no-op unless the previous `update` crossed queues; idempotent within
    /// a frame. Must run on the graphics command buffer before `bind`.
    pub fn wait(&mut self, command_buffer: vk::CommandBuffer) {
        if !self.transfer_pending {
            return;
        }
        self.transfer_pending = false;

        let Some(transfer) = self.transfer else {
            return;
        };

        let barriers = [
            MemoryBarrierBuilder::buffer_acquire_ownership(
                self.vertex_arena.handle(),
                transfer.family,
                self.graphics_family,
            ),
            MemoryBarrierBuilder::buffer_acquire_ownership(
                self.index_arena.handle(),
                transfer.family,
                self.graphics_family,
            ),
        ];

        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::DependencyFlags::empty(),
                &[],
                &barriers,
                &[],
            );
        }
    }

    /// Bind the arenas for subsequent indexed draws
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        let buffers = [self.vertex_arena.handle()];
        let offsets = [0];
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(command_buffer, 0, &buffers, &offsets);
            self.device.cmd_bind_index_buffer(
                command_buffer,
                self.index_arena.handle(),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    /// O(1) lookup of the proxy handle for a mesh id
    pub fn handle_of(&self, mesh_id: MeshId) -> Option<ProxyHandle> {
        self.placements.handle_of(mesh_id)
    }

    /// O(1) proxy lookup by handle
    pub fn get(&self, handle: ProxyHandle) -> Option<&MeshProxy> {
        self.placements.get(handle)
    }

    /// Timeline value the next graphics submit must wait on, if any
    ///
    /// Consumed once; `DeviceContext::submit_frame` passes it through.
    pub fn take_pending_timeline_value(&mut self) -> Option<u64> {
        self.pending_wait_value.take()
    }

    /// Whether a cross-queue transfer from the last `update` awaits `wait`
    pub fn transfer_pending(&self) -> bool {
        self.transfer_pending
    }

    /// Release the staging buffer and both arenas
    pub fn destroy(self, ctx: &DeviceContext) {
        self.staging.destroy(ctx.allocator());
        self.vertex_arena.destroy(ctx.allocator());
        self.index_arena.destroy(ctx.allocator());
    }

    fn ensure_arena_capacity(
        &mut self,
        ctx: &DeviceContext,
        incoming_vertices: u32,
        incoming_indices: u32,
    ) -> VulkanResult<()> {
        let vertex_required = self.placements.vertex_ranges().required_capacity(incoming_vertices);
        if vertex_required > self.placements.vertex_ranges().capacity() {
            let new_capacity =
                grow_capacity(self.placements.vertex_ranges().capacity(), vertex_required);
            let live = self.placements.vertex_ranges().high_water();
            self.vertex_arena.grow(ctx, &self.upload_fence, new_capacity, live)?;
            self.placements.grow_vertex_capacity(new_capacity);
            log::debug!("Vertex arena grown to {new_capacity} elements");
        }

        let index_required = self.placements.index_ranges().required_capacity(incoming_indices);
        if index_required > self.placements.index_ranges().capacity() {
            let new_capacity =
                grow_capacity(self.placements.index_ranges().capacity(), index_required);
            let live = self.placements.index_ranges().high_water();
            self.index_arena.grow(ctx, &self.upload_fence, new_capacity, live)?;
            self.placements.grow_index_capacity(new_capacity);
            log::debug!("Index arena grown to {new_capacity} elements");
        }

        Ok(())
    }

    fn ensure_staging_capacity(
        &mut self,
        ctx: &DeviceContext,
        required: vk::DeviceSize,
    ) -> VulkanResult<()> {
        if self.staging.size() >= required {
            return Ok(());
        }

        let new_size = required.next_power_of_two().max(self.staging.size() * 2);
        let new_staging = DeviceBuffer::new(
            ctx.allocator(),
            new_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            true,
        )?;
        let old = std::mem::replace(&mut self.staging, new_staging);
        old.destroy(ctx.allocator());
        log::debug!("Staging buffer grown to {new_size} bytes");
        Ok(())
    }

    fn submit_copies(&mut self, ctx: &DeviceContext, upload: &UpdateContext) -> VulkanResult<()> {
        let cross_queue = self
            .transfer
            .filter(|t| t.family != self.graphics_family);

        let (pool, queue) = match (cross_queue, ctx.transfer_pool()) {
            (Some(transfer), Some(pool)) => (pool, transfer.queue),
            _ => (ctx.upload_pool(), ctx.queues().graphics_queue),
        };

        let mut recorder = pool.begin_single_time()?;
        let vertex_copies = upload.vertex_copies();
        if !vertex_copies.is_empty() {
            recorder.cmd_copy_buffer(self.staging.handle(), self.vertex_arena.handle(), &vertex_copies);
        }
        let index_copies = upload.index_copies();
        if !index_copies.is_empty() {
            recorder.cmd_copy_buffer(self.staging.handle(), self.index_arena.handle(), &index_copies);
        }

        if let Some(transfer) = cross_queue {
            // Hand arena ownership to the graphics family; the matching
            // acquire is recorded by wait() on the graphics command buffer.
            let barriers = [
                MemoryBarrierBuilder::buffer_release_ownership(
                    self.vertex_arena.handle(),
                    transfer.family,
                    self.graphics_family,
                ),
                MemoryBarrierBuilder::buffer_release_ownership(
                    self.index_arena.handle(),
                    transfer.family,
                    self.graphics_family,
                ),
            ];
            recorder.cmd_buffer_barriers(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                &barriers,
            );
            let command_buffer = recorder.end()?;

            let value = ctx.timeline().next_value();
            let command_buffers = [command_buffer];
            let signal_semaphores = [ctx.timeline().handle()];
            let signal_values = [value];
            let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
                .signal_semaphore_values(&signal_values);
            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores)
                .push_next(&mut timeline_info);

            unsafe {
                self.device
                    .queue_submit(queue, &[submit_info.build()], self.upload_fence.handle())
                    .map_err(VulkanError::Api)?;
            }
            self.upload_fence.wait(u64::MAX)?;
            self.upload_fence.reset()?;
            pool.free(command_buffer);

            self.transfer_pending = true;
            self.pending_wait_value = Some(value);
        } else {
            // Same queue: a pipeline barrier in submission order is enough,
            // no ownership transfer exists.
            recorder.cmd_memory_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                MemoryBarrierBuilder::buffer_transfer_to_vertex_read(),
            );
            let command_buffer = recorder.end()?;
            pool.submit_single_time(command_buffer, queue, &self.upload_fence)?;
        }

        Ok(())
    }
}

/// Doubling growth, clamped up to the worst-case requirement
fn grow_capacity(current: u32, required: u32) -> u32 {
    required.next_power_of_two().max(current.saturating_mul(2))
}

fn write_staging(mapped: *mut u8, offset: u64, bytes: &[u8]) {
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.add(offset as usize), bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(mesh_id: MeshId, vertex_count: usize, index_count: usize) -> GeometryUpdate {
        GeometryUpdate {
            mesh_id,
            vertices: vec![Vertex::new([0.0; 3], [0.0, 1.0, 0.0], [0.0; 2]); vertex_count],
            indices: (0..index_count as u32).collect(),
        }
    }

    #[test]
    fn test_staging_offsets_advance_sequentially() {
        let mut placements = MeshPlacements::new(64, 64);
        let added = [geometry(1, 4, 6), geometry(2, 3, 3)];
        let update = plan_uploads(&mut placements, &added, &[]).unwrap();

        let a = &update.staged[0];
        let b = &update.staged[1];
        let va = a.vertex_region.unwrap();
        let ia = a.index_region.unwrap();
        let vb = b.vertex_region.unwrap();
        let ib = b.index_region.unwrap();

        assert_eq!(va.src_offset, 0);
        assert_eq!(ia.src_offset, va.size);
        assert_eq!(vb.src_offset, ia.src_offset + ia.size);
        assert_eq!(ib.src_offset, vb.src_offset + vb.size);
        assert_eq!(update.staging_bytes(), ib.src_offset + ib.size);
    }

    #[test]
    fn test_copy_regions_target_claimed_ranges() {
        let mut placements = MeshPlacements::new(64, 64);
        let added = [geometry(1, 4, 6), geometry(2, 3, 3)];
        let update = plan_uploads(&mut placements, &added, &[]).unwrap();

        let b = &update.staged[1];
        assert_eq!(
            b.vertex_region.unwrap().dst_offset,
            4 * u64::from(VERTEX_STRIDE)
        );
        assert_eq!(
            b.index_region.unwrap().dst_offset,
            6 * u64::from(INDEX_STRIDE)
        );
    }

    #[test]
    fn test_unknown_dirty_mesh_is_not_staged() {
        let mut placements = MeshPlacements::new(64, 64);
        let dirty = [geometry(42, 4, 6)];
        let update = plan_uploads(&mut placements, &[], &dirty).unwrap();
        assert!(update.is_empty());
        assert_eq!(update.staging_bytes(), 0);
    }

    #[test]
    fn test_dirty_after_add_restages_in_place() {
        let mut placements = MeshPlacements::new(64, 64);
        let added = [geometry(1, 4, 6)];
        plan_uploads(&mut placements, &added, &[]).unwrap();

        let dirty = [geometry(1, 4, 6)];
        let update = plan_uploads(&mut placements, &[], &dirty).unwrap();
        let staged = &update.staged[0];
        // Same size still fits: the proxy keeps its offsets.
        assert_eq!(staged.vertex_region.unwrap().dst_offset, 0);
        assert_eq!(staged.index_region.unwrap().dst_offset, 0);
    }

    #[test]
    fn test_grow_capacity_is_monotonic() {
        assert!(grow_capacity(64, 65) >= 65);
        assert!(grow_capacity(64, 65) >= 128);
        assert!(grow_capacity(64, 1000) >= 1000);
        assert!(grow_capacity(0, 1) >= 1);
    }
}
