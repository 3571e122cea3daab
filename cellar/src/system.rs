//! Anonymous page mappings backing the cell arena.
use std::ptr::NonNull;

#[cfg(unix)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;
    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// Private anonymous read/write mapping. The kernel hands these out zero filled.
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_mmap(len: usize) -> *mut u8 {
        // SAFETY: fresh mapping, no existing memory is touched
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// # Safety
    /// ptr and len must describe a mapping created by `anonymous_mmap`
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// Rounds `bytes` up to whole pages.
pub const fn page_align(bytes: usize) -> usize {
    bytes.div_ceil(OS_PAGE_SIZE) * OS_PAGE_SIZE
}

/// Maps `size` bytes of zeroed memory, `None` if the OS refuses.
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: the result is null checked below
    let ptr = unsafe { unix::anonymous_mmap(size) };
    NonNull::new(ptr)
}

/// # Safety
/// `ptr` must come from [`map_memory`] with the same `size` and must not be used afterwards
pub unsafe fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: by contract
    unsafe { unix::anonymous_munmap(ptr.as_ptr(), size) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_memory_is_zeroed_and_writable() {
        let size = page_align(100);
        assert_eq!(size, OS_PAGE_SIZE);
        let ptr = map_memory(size).expect("mmap");
        // SAFETY: freshly mapped, size bytes long
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), size) };
        assert!(bytes.iter().all(|b| *b == 0));
        bytes[size - 1] = 7;
        assert_eq!(bytes[size - 1], 7);
        // SAFETY: same mapping, no outstanding borrows after this point
        unsafe { unmap_memory(ptr, size) };
    }
}
