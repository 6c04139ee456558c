//! Run-time call-distance bridging.
//!
//! Direct x86-64 branches reach only ±2 GiB. When a call site needs to
//! reach a target outside that range, it is routed through a jump stub
//! materialized here: a near `jmp rel32` when the stub itself can reach
//! the target, otherwise an absolute jump through a scratch register.

use std::ptr::NonNull;

/// Error type for stub-heap operations.
#[derive(Debug)]
pub enum StubHeapError {
    AllocationFailed,
    Exhausted,
    InvalidSize,
}

impl std::fmt::Display for StubHeapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StubHeapError::AllocationFailed => write!(f, "stub heap allocation failed"),
            StubHeapError::Exhausted => write!(f, "stub heap exhausted"),
            StubHeapError::InvalidSize => write!(f, "invalid stub heap size"),
        }
    }
}

impl std::error::Error for StubHeapError {}

/// `jmp rel32`
const NEAR_STUB_LEN: usize = 5;
/// `mov r10, imm64; jmp r10`
const FAR_STUB_LEN: usize = 13;
/// Stubs start on their own cache-friendly boundary.
const STUB_ALIGN: usize = 16;

/// A bump allocator over executable memory handing out jump stubs.
///
/// The region is mapped readable, writable and executable for its whole
/// lifetime; stubs keep being added while earlier ones are already live.
pub struct StubHeap {
    base: NonNull<u8>,
    capacity: usize,
    used: usize,
}

impl StubHeap {
    /// Map a new stub region with at least `capacity` bytes.
    pub fn new(capacity: usize) -> Result<StubHeap, StubHeapError> {
        if capacity == 0 {
            return Err(StubHeapError::InvalidSize);
        }

        let page_size = Self::page_size();
        let capacity = (capacity + page_size - 1) & !(page_size - 1);
        let base = Self::map_exec(capacity)?;

        Ok(StubHeap {
            base,
            capacity,
            used: 0,
        })
    }

    fn page_size() -> usize {
        #[cfg(unix)]
        {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }
        #[cfg(not(unix))]
        {
            4096
        }
    }

    #[cfg(unix)]
    fn map_exec(size: usize) -> Result<NonNull<u8>, StubHeapError> {
        use std::ptr;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(StubHeapError::AllocationFailed);
        }

        NonNull::new(ptr as *mut u8).ok_or(StubHeapError::AllocationFailed)
    }

    #[cfg(not(unix))]
    fn map_exec(size: usize) -> Result<NonNull<u8>, StubHeapError> {
        let layout = std::alloc::Layout::from_size_align(size, Self::page_size())
            .map_err(|_| StubHeapError::InvalidSize)?;
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(StubHeapError::AllocationFailed)
    }

    pub fn base(&self) -> *const u8 {
        self.base.as_ptr()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Materialize a jump stub to `target` and return its address.
    pub fn jump_stub(&mut self, target: usize) -> Result<usize, StubHeapError> {
        let offset = (self.used + STUB_ALIGN - 1) & !(STUB_ALIGN - 1);
        if offset + FAR_STUB_LEN > self.capacity {
            return Err(StubHeapError::Exhausted);
        }
        let stub = self.base.as_ptr() as usize + offset;

        let rel = target as i128 - (stub + NEAR_STUB_LEN) as i128;
        let mut bytes = [0u8; FAR_STUB_LEN];
        let len = if i32::try_from(rel).is_ok() {
            bytes[0] = 0xE9;
            bytes[1..5].copy_from_slice(&(rel as i32).to_le_bytes());
            NEAR_STUB_LEN
        } else {
            // mov r10, target
            bytes[0] = 0x49;
            bytes[1] = 0xBA;
            bytes[2..10].copy_from_slice(&(target as u64).to_le_bytes());
            // jmp r10
            bytes[10] = 0x41;
            bytes[11] = 0xFF;
            bytes[12] = 0xE2;
            FAR_STUB_LEN
        };

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), stub as *mut u8, len);
        }
        self.used = offset + len;
        Ok(stub)
    }
}

impl Drop for StubHeap {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            unsafe {
                libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.capacity);
            }
        }
        #[cfg(not(unix))]
        {
            let layout = std::alloc::Layout::from_size_align(self.capacity, Self::page_size())
                .expect("invalid layout");
            unsafe {
                std::alloc::dealloc(self.base.as_ptr(), layout);
            }
        }
    }
}

// StubHeap owns its mapping exclusively.
unsafe impl Send for StubHeap {}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_bytes(addr: usize, len: usize) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(addr as *const u8, len) }.to_vec()
    }

    #[test]
    fn test_near_target_uses_rel32_jump() {
        let mut heap = StubHeap::new(4096).unwrap();
        let target = heap.base() as usize + 256;
        let stub = heap.jump_stub(target).unwrap();

        let bytes = stub_bytes(stub, NEAR_STUB_LEN);
        assert_eq!(bytes[0], 0xE9);
        let rel = i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        assert_eq!(stub.wrapping_add(NEAR_STUB_LEN).wrapping_add(rel as usize), target);
    }

    #[test]
    fn test_far_target_uses_absolute_jump() {
        let mut heap = StubHeap::new(4096).unwrap();
        // Far outside any plausible mapping distance.
        let target = 0x1122_3344_5566_7788usize;
        let stub = heap.jump_stub(target).unwrap();

        let bytes = stub_bytes(stub, FAR_STUB_LEN);
        assert_eq!(&bytes[..2], &[0x49, 0xBA]);
        assert_eq!(
            u64::from_le_bytes(bytes[2..10].try_into().unwrap()),
            target as u64
        );
        assert_eq!(&bytes[10..], &[0x41, 0xFF, 0xE2]);
    }

    #[test]
    fn test_stubs_are_aligned_and_distinct() {
        let mut heap = StubHeap::new(4096).unwrap();
        let target = heap.base() as usize;
        let a = heap.jump_stub(target).unwrap();
        let b = heap.jump_stub(target).unwrap();
        assert_ne!(a, b);
        assert_eq!(a % STUB_ALIGN, 0);
        assert_eq!(b % STUB_ALIGN, 0);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut heap = StubHeap::new(64).unwrap();
        let capacity = heap.capacity();
        let target = heap.base() as usize;
        let mut made = 0;
        loop {
            match heap.jump_stub(target) {
                Ok(_) => made += 1,
                Err(StubHeapError::Exhausted) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(made, capacity / STUB_ALIGN);
    }
}
