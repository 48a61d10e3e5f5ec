//! Memory-mapped shared region, created by one process and opened by peers.
//!
//! Regions are files under `/dev/shm` on Linux (the temp dir elsewhere) so
//! a name is enough to rendezvous. The creator owns the file and unlinks it
//! on drop; openers only unmap.

use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::PathBuf;

use memmap2::MmapMut;
use tracing::warn;

use crate::error::{Error, Result};

/// A mapped shared-memory region.
///
/// `UnsafeCell` because the mapping is written through an immutable
/// reference: the region is shared between processes and each section has a
/// single designated writer, synchronized by the atomics embedded in the
/// layout structs.
pub struct SharedMemoryRegion {
    mmap: UnsafeCell<MmapMut>,
    name: String,
    len: usize,
    owns_file: bool,
}

// Safety: sections have one writer each by protocol, and all cross-process
// publication goes through atomics inside the mapped structs.
unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Create (or truncate) a region of `len` bytes. The new region is
    /// zero-filled.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let path = Self::backing_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::SharedMemory(format!("create {}: {e}", path.display())))?;
        file.set_len(len as u64)
            .map_err(|e| Error::SharedMemory(format!("size {}: {e}", path.display())))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| Error::SharedMemory(format!("map {}: {e}", path.display())))?;
        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            len,
            owns_file: true,
        })
    }

    /// Open an existing region by name. Fails when the backing file is
    /// smaller than `expected_len`.
    pub fn open(name: &str, expected_len: usize) -> Result<Self> {
        let path = Self::backing_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::SharedMemory(format!("open {}: {e}", path.display())))?;
        let actual = file
            .metadata()
            .map_err(|e| Error::SharedMemory(format!("stat {}: {e}", path.display())))?
            .len() as usize;
        if actual < expected_len {
            return Err(Error::RegionTooSmall {
                actual,
                required: expected_len,
            });
        }
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| Error::SharedMemory(format!("map {}: {e}", path.display())))?;
        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            len: actual,
            owns_file: false,
        })
    }

    /// Remove a stale backing file left by a crashed peer.
    pub fn unlink_stale(name: &str) {
        let path = Self::backing_path(name);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to unlink stale region");
            }
        }
    }

    fn backing_path(name: &str) -> PathBuf {
        #[cfg(target_os = "linux")]
        let base = PathBuf::from("/dev/shm");
        #[cfg(not(target_os = "linux"))]
        let base = std::env::temp_dir();
        base.join(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer of the mapping.
    ///
    /// Callers derive typed references into the region from this; the
    /// layout structs' verify/initialize flows bound what is dereferenced.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        // Safety: MmapMut's pointer is stable for the life of the mapping.
        unsafe { (*self.mmap.get()).as_mut_ptr() }
    }

    /// A typed reference at a byte offset.
    ///
    /// # Safety
    ///
    /// The offset must hold an initialized, properly aligned `T`, and the
    /// caller must respect the single-writer protocol for that section.
    #[inline]
    pub unsafe fn at<T>(&self, offset: u64) -> &T {
        debug_assert!(offset as usize + std::mem::size_of::<T>() <= self.len);
        &*(self.base_ptr().add(offset as usize) as *const T)
    }

    /// A mutable typed pointer at a byte offset.
    ///
    /// # Safety
    ///
    /// As [`Self::at`], and the caller must be this section's writer.
    #[inline]
    pub unsafe fn at_mut<T>(&self, offset: u64) -> *mut T {
        debug_assert!(offset as usize + std::mem::size_of::<T>() <= self.len);
        self.base_ptr().add(offset as usize) as *mut T
    }

    /// Float slice covering one audio channel of one slot.
    ///
    /// # Safety
    ///
    /// The offset/len must lie inside an audio section and the caller must
    /// be that slot's writer (or hold it read-only per the block protocol).
    #[inline]
    pub unsafe fn audio_slice_mut(&self, offset: u64, samples: usize) -> &mut [f32] {
        debug_assert!(offset as usize + samples * 4 <= self.len);
        std::slice::from_raw_parts_mut(self.base_ptr().add(offset as usize) as *mut f32, samples)
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        if self.owns_file {
            let path = Self::backing_path(&self.name);
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Create and initialize a track region: header written, rings initialized,
/// mailbox zeroed. This is the region-owner side of the contract (the host
/// child in production, the test harness elsewhere).
pub fn create_track_region(
    name: &str,
    geometry: &crate::layout::TrackRegionGeometry,
) -> Result<SharedMemoryRegion> {
    let (header, size) = geometry.build_header()?;
    let region = SharedMemoryRegion::create(name, size)?;
    // Safety: the region was just created at the computed size; offsets come
    // from the same layout computation.
    unsafe {
        *region.at_mut::<crate::layout::ShmHeader>(0) = header;
        let base = region.base_ptr();
        crate::ring::EventRing::initialize(base, header.ring_std_offset, geometry.ring_std_capacity);
        crate::ring::EventRing::initialize(base, header.ring_ctrl_offset, geometry.ring_ctrl_capacity);
        crate::ring::EventRing::initialize(base, header.ring_ui_offset, geometry.ring_ui_capacity);
    }
    Ok(region)
}

/// Create and initialize the engine-owned UI region.
pub fn create_ui_region(
    name: &str,
    geometry: &crate::ui_layout::UiRegionGeometry,
) -> Result<SharedMemoryRegion> {
    let (header, size) = geometry.build_header()?;
    let region = SharedMemoryRegion::create(name, size)?;
    // Safety: as above; the header embeds an atomic so it is written in
    // place rather than moved.
    unsafe {
        let slot = region.at_mut::<crate::ui_layout::UiShmHeader>(0);
        std::ptr::write(slot, header);
        let base = region.base_ptr();
        let header = &*slot;
        crate::ring::EventRing::initialize(base, header.ring_ui_in_offset, geometry.ring_ui_in_capacity);
        crate::ring::EventRing::initialize(base, header.ring_ui_out_offset, geometry.ring_ui_out_capacity);
    }
    Ok(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("ostinato_test_{}_{}", tag, std::process::id())
    }

    #[test]
    fn create_then_open_shares_bytes() {
        let name = unique_name("share");
        let owner = SharedMemoryRegion::create(&name, 4096).unwrap();
        unsafe {
            *owner.at_mut::<u64>(128) = 0xDEAD_BEEF_CAFE;
        }
        let peer = SharedMemoryRegion::open(&name, 4096).unwrap();
        let value = unsafe { *peer.at::<u64>(128) };
        assert_eq!(value, 0xDEAD_BEEF_CAFE);
    }

    #[test]
    fn open_missing_region_fails() {
        assert!(SharedMemoryRegion::open(&unique_name("missing"), 64).is_err());
    }

    #[test]
    fn open_undersized_region_fails() {
        let name = unique_name("small");
        let _owner = SharedMemoryRegion::create(&name, 128).unwrap();
        let result = SharedMemoryRegion::open(&name, 4096);
        assert!(matches!(result, Err(Error::RegionTooSmall { .. })));
    }

    #[test]
    fn owner_unlinks_on_drop() {
        let name = unique_name("unlink");
        {
            let _owner = SharedMemoryRegion::create(&name, 64).unwrap();
        }
        assert!(SharedMemoryRegion::open(&name, 64).is_err());
    }

    #[test]
    fn new_region_is_zeroed() {
        let name = unique_name("zeroed");
        let owner = SharedMemoryRegion::create(&name, 1024).unwrap();
        let slice = unsafe { owner.audio_slice_mut(0, 256) };
        assert!(slice.iter().all(|&s| s == 0.0));
    }
}
