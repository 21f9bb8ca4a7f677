//! Mesh proxy placement
//!
//! The CPU-side record of where each mesh currently lives inside the vertex
//! and index arenas. Exactly one proxy exists per live `MeshId`; operations
//! on unknown ids are operator errors, logged and skipped rather than fatal.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::context::{VulkanError, VulkanResult};
use crate::streamer::arena::{Range, RangeAlloc};
use crate::streamer::packet::MeshId;

slotmap::new_key_type! {
    /// Opaque handle to a mesh proxy
    pub struct ProxyHandle;
}

/// GPU-side placement of one mesh's geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshProxy {
    /// First vertex element inside the vertex arena
    pub vertex_offset: u32,
    /// Number of vertices
    pub vertex_count: u32,
    /// First index element inside the index arena
    pub index_offset: u32,
    /// Number of indices
    pub index_count: u32,
}

impl MeshProxy {
    fn vertex_range(&self) -> Range {
        Range {
            offset: self.vertex_offset,
            count: self.vertex_count,
        }
    }

    fn index_range(&self) -> Range {
        Range {
            offset: self.index_offset,
            count: self.index_count,
        }
    }
}

/// Proxy map plus the range allocators for both arenas
///
/// Pure CPU state: every placement decision (claim, move, release) happens
/// here, so the full add/update/remove behavior is testable without a device.
pub struct MeshPlacements {
    proxies: SlotMap<ProxyHandle, MeshProxy>,
    by_id: HashMap<MeshId, ProxyHandle>,
    vertex_ranges: RangeAlloc,
    index_ranges: RangeAlloc,
}

impl MeshPlacements {
    /// Create empty placements over the given arena capacities (in elements)
    pub fn new(vertex_capacity: u32, index_capacity: u32) -> Self {
        Self {
            proxies: SlotMap::with_key(),
            by_id: HashMap::new(),
            vertex_ranges: RangeAlloc::new(vertex_capacity),
            index_ranges: RangeAlloc::new(index_capacity),
        }
    }

    /// O(1) lookup of the proxy handle for a mesh id
    pub fn handle_of(&self, mesh_id: MeshId) -> Option<ProxyHandle> {
        self.by_id.get(&mesh_id).copied()
    }

    /// O(1) proxy lookup by handle
    pub fn get(&self, handle: ProxyHandle) -> Option<&MeshProxy> {
        self.proxies.get(handle)
    }

    /// Number of live proxies
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// True when no proxies are live
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Vertex arena range state
    pub fn vertex_ranges(&self) -> &RangeAlloc {
        &self.vertex_ranges
    }

    /// Index arena range state
    pub fn index_ranges(&self) -> &RangeAlloc {
        &self.index_ranges
    }

    /// Raise the vertex arena capacity after a device-buffer growth
    pub fn grow_vertex_capacity(&mut self, new_capacity: u32) {
        self.vertex_ranges.grow(new_capacity);
    }

    /// Raise the index arena capacity after a device-buffer growth
    pub fn grow_index_capacity(&mut self, new_capacity: u32) {
        self.index_ranges.grow(new_capacity);
    }

    /// Drop a mesh, releasing its ranges for reuse
    ///
    /// Returns false (after a logged warning) when the id has no proxy.
    pub fn remove(&mut self, mesh_id: MeshId) -> bool {
        let Some(handle) = self.by_id.remove(&mesh_id) else {
            log::warn!("Removal of unknown mesh {mesh_id} skipped");
            return false;
        };

        if let Some(proxy) = self.proxies.remove(handle) {
            self.vertex_ranges.release(proxy.vertex_range());
            self.index_ranges.release(proxy.index_range());
        }
        true
    }

    /// Place a newly added mesh, claiming fresh ranges in both arenas
    ///
    /// An id that already has a proxy is treated as an update (logged).
    pub fn place_added(
        &mut self,
        mesh_id: MeshId,
        vertex_count: u32,
        index_count: u32,
    ) -> VulkanResult<MeshProxy> {
        if let Some(&handle) = self.by_id.get(&mesh_id) {
            log::warn!("Mesh {mesh_id} added while already resident; updating in place");
            return self.replace(handle, vertex_count, index_count);
        }

        let vertex_range = Self::claim(&mut self.vertex_ranges, vertex_count)?;
        let index_range = Self::claim(&mut self.index_ranges, index_count)?;

        let proxy = MeshProxy {
            vertex_offset: vertex_range.offset,
            vertex_count: vertex_range.count,
            index_offset: index_range.offset,
            index_count: index_range.count,
        };
        let handle = self.proxies.insert(proxy);
        self.by_id.insert(mesh_id, handle);
        Ok(proxy)
    }

    /// Re-place a dirty mesh, keeping its offsets where the new size fits
    ///
    /// Returns `Ok(None)` (after a logged warning) when the id has no proxy.
    pub fn place_dirty(
        &mut self,
        mesh_id: MeshId,
        vertex_count: u32,
        index_count: u32,
    ) -> VulkanResult<Option<MeshProxy>> {
        let Some(&handle) = self.by_id.get(&mesh_id) else {
            log::warn!("Update of unknown mesh {mesh_id} skipped");
            return Ok(None);
        };

        self.replace(handle, vertex_count, index_count).map(Some)
    }

    fn replace(
        &mut self,
        handle: ProxyHandle,
        vertex_count: u32,
        index_count: u32,
    ) -> VulkanResult<MeshProxy> {
        let old = self.proxies[handle];

        let vertex_offset =
            Self::check_or_move(&mut self.vertex_ranges, old.vertex_range(), vertex_count)?;
        let index_offset =
            Self::check_or_move(&mut self.index_ranges, old.index_range(), index_count)?;

        let proxy = MeshProxy {
            vertex_offset,
            vertex_count,
            index_offset,
            index_count,
        };
        self.proxies[handle] = proxy;
        Ok(proxy)
    }

    /// Keep the existing offset when the new size fits, else claim elsewhere
    ///
    /// The new range is claimed before the old one is released so a moving
    /// mesh never aliases its previous storage mid-frame. Shrinks return the
    /// surplus tail to the free list immediately.
    fn check_or_move(ranges: &mut RangeAlloc, old: Range, new_count: u32) -> VulkanResult<u32> {
        if new_count <= old.count {
            ranges.release(Range {
                offset: old.offset + new_count,
                count: old.count - new_count,
            });
            Ok(old.offset)
        } else {
            let fresh = Self::claim(ranges, new_count)?;
            ranges.release(old);
            Ok(fresh.offset)
        }
    }

    fn claim(ranges: &mut RangeAlloc, count: u32) -> VulkanResult<Range> {
        ranges.claim(count).ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Arena claim failed after growth sizing".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placements() -> MeshPlacements {
        MeshPlacements::new(64, 64)
    }

    /// Collect live ranges and assert pairwise disjointness in both arenas.
    fn assert_no_overlap(p: &MeshPlacements) {
        let mut vertex_ranges: Vec<Range> = p.proxies.values().map(MeshProxy::vertex_range).collect();
        let mut index_ranges: Vec<Range> = p.proxies.values().map(MeshProxy::index_range).collect();
        for ranges in [&mut vertex_ranges, &mut index_ranges] {
            ranges.retain(|r| r.count > 0);
            ranges.sort_by_key(|r| r.offset);
            for pair in ranges.windows(2) {
                assert!(pair[0].end() <= pair[1].offset, "overlapping ranges: {pair:?}");
            }
        }
    }

    #[test]
    fn test_first_mesh_lands_at_zero() {
        let mut p = placements();
        let proxy = p.place_added(1, 4, 6).unwrap();
        assert_eq!(proxy.vertex_offset, 0);
        assert_eq!(proxy.vertex_count, 4);
        assert_eq!(proxy.index_offset, 0);
        assert_eq!(proxy.index_count, 6);
        assert!(p.handle_of(1).is_some());
    }

    #[test]
    fn test_second_mesh_appends() {
        let mut p = placements();
        p.place_added(1, 4, 6).unwrap();
        let b = p.place_added(2, 3, 3).unwrap();
        assert_eq!(b.vertex_offset, 4);
        assert_eq!(b.index_offset, 6);
        assert_no_overlap(&p);
    }

    #[test]
    fn test_remove_frees_ranges() {
        let mut p = placements();
        p.place_added(1, 4, 6).unwrap();
        p.place_added(2, 3, 3).unwrap();
        assert!(p.remove(1));
        assert!(p.handle_of(1).is_none());
        assert_eq!(p.vertex_ranges().free_total(), 4);
        assert_eq!(p.index_ranges().free_total(), 6);
    }

    #[test]
    fn test_exact_fit_reuses_freed_range() {
        let mut p = placements();
        p.place_added(1, 4, 6).unwrap();
        p.place_added(2, 3, 3).unwrap();
        p.remove(1);
        let c = p.place_added(3, 4, 6).unwrap();
        assert_eq!(c.vertex_offset, 0);
        assert_eq!(c.index_offset, 0);
        assert_no_overlap(&p);
    }

    #[test]
    fn test_dirty_grow_moves_to_end_and_releases_old() {
        let mut p = placements();
        p.place_added(1, 4, 6).unwrap();
        p.place_added(2, 3, 3).unwrap();
        p.remove(1);
        p.place_added(3, 4, 6).unwrap();

        p.grow_vertex_capacity(64);
        let b = p.place_dirty(2, 10, 10).unwrap().unwrap();
        // B no longer fits in place: new range at the end of the arena.
        assert_eq!(b.vertex_offset, 7);
        assert_eq!(b.index_offset, 9);
        // Old [4,7) vertex and [6,9) index ranges are back on the free list.
        assert_eq!(p.vertex_ranges().free_total(), 3);
        assert_eq!(p.index_ranges().free_total(), 3);
        assert_no_overlap(&p);
    }

    #[test]
    fn test_dirty_shrink_keeps_offset_and_releases_tail() {
        let mut p = placements();
        p.place_added(1, 8, 12).unwrap();
        p.place_added(2, 2, 3).unwrap();
        let a = p.place_dirty(1, 4, 6).unwrap().unwrap();
        assert_eq!(a.vertex_offset, 0);
        assert_eq!(a.vertex_count, 4);
        assert_eq!(p.vertex_ranges().free_total(), 4);
        assert_eq!(p.index_ranges().free_total(), 6);
        assert_no_overlap(&p);
    }

    #[test]
    fn test_unknown_ids_are_skipped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut p = placements();
        assert!(!p.remove(42));
        assert!(p.place_dirty(42, 4, 6).unwrap().is_none());
        assert!(p.is_empty());
    }

    #[test]
    fn test_one_proxy_per_id() {
        let mut p = placements();
        p.place_added(1, 4, 6).unwrap();
        // Adding the same id again must not create a second proxy.
        p.place_added(1, 6, 9).unwrap();
        assert_eq!(p.len(), 1);
        let proxy = p.get(p.handle_of(1).unwrap()).unwrap();
        assert_eq!(proxy.vertex_count, 6);
        assert_eq!(proxy.index_count, 9);
        assert_no_overlap(&p);
    }

    #[test]
    fn test_interleaved_churn_stays_disjoint() {
        let mut p = MeshPlacements::new(256, 256);
        for id in 0..16u64 {
            p.place_added(id, (id as u32 % 7) + 1, (id as u32 % 5) + 3).unwrap();
        }
        for id in (0..16u64).step_by(2) {
            p.remove(id);
        }
        for id in 16..24u64 {
            p.place_added(id, 4, 6).unwrap();
        }
        for id in (1..16u64).step_by(2) {
            p.place_dirty(id, 9, 2).unwrap();
        }
        assert_eq!(p.len(), 8 + 8);
        assert_no_overlap(&p);
    }
}
