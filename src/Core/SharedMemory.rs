// Shared memory backend abstraction.
// Named segments live under /dev/shm and are mapped with mmap; the heap backend
// gives the same interface to process-local transports and tests.

use std::alloc::{self, Layout};
use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
use std::fs::{File, OpenOptions};
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
#[cfg(target_os = "linux")]
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};

/// Alignment of every mapping handed out by a backend.
pub const SEGMENT_ALIGN: usize = 128;

/// Shared memory backend trait
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying handle
    fn raw_handle(&self) -> RawHandle;

    /// Segment name, if the region is named.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Remove the name so no new party can open the segment. Existing mappings
    /// stay valid until dropped. Removing an already-removed name is not an error.
    fn unlink(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// Unix file descriptor (Linux)
    Fd(i32),
    /// Process-local heap allocation
    Heap,
}

/// Path of a named segment. A leading '/' (POSIX shm style) is accepted.
#[cfg(target_os = "linux")]
pub fn segment_path(name: &str) -> String {
    format!("/dev/shm/{}", name.trim_start_matches('/'))
}

/// Create a named shared memory region of `size` zeroed bytes.
///
/// An existing segment with the same name is truncated and reinitialized.
#[cfg(target_os = "linux")]
pub fn create_shared_memory(size: usize, name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::create(size, name)?))
}

/// Attach to an existing named region, mapping its full current size.
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::attach(name)?))
}

/// Remove a named region without holding a mapping of it.
#[cfg(target_os = "linux")]
pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
    match std::fs::remove_file(segment_path(name)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_size: usize, _name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn unlink_shared_memory(_name: &str) -> io::Result<()> {
    Ok(())
}

/// Allocate a zeroed, process-local region.
pub fn create_heap_memory(size: usize) -> io::Result<HeapMemory> {
    HeapMemory::new(size)
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    file: File,
    name: String,
}

#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    /// Create (or truncate and recreate) the file in /dev/shm and map it.
    pub fn create(size: usize, name: &str) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let path = segment_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to create shared memory file at {}: {}", path, e),
                )
            })?;

        // Truncated to zero above, so the new pages read as zeros.
        file.set_len(size as u64)?;

        let ptr = Self::map(&file, size)?;
        Ok(Self {
            ptr,
            size,
            file,
            name: name.to_owned(),
        })
    }

    /// Open an existing file in /dev/shm and map its full size.
    pub fn attach(name: &str) -> io::Result<Self> {
        let path = segment_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to open shared memory at {}: {}", path, e),
                )
            })?;

        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Shared memory at {} is empty", path),
            ));
        }

        let ptr = Self::map(&file, size)?;
        Ok(Self {
            ptr,
            size,
            file,
            name: name.to_owned(),
        })
    }

    fn map(file: &File, size: usize) -> io::Result<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // mmap hands out page-aligned addresses.
        debug_assert_eq!(ptr as usize % SEGMENT_ALIGN, 0);
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.file.as_raw_fd())
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn unlink(&self) -> io::Result<()> {
        // The name may already point at a newer segment; leave that one alone.
        let current = match std::fs::metadata(segment_path(&self.name)) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let mapped = self.file.metadata()?;
        if (current.dev(), current.ino()) != (mapped.dev(), mapped.ino()) {
            return Ok(());
        }
        unlink_shared_memory(&self.name)
    }
}

/// Zeroed heap region with the same alignment guarantees as a mapping.
#[derive(Debug)]
pub struct HeapMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HeapMemory {}
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let layout = Layout::from_size_align(size, SEGMENT_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("Failed to allocate {} bytes", size),
            )
        })?;
        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl SharedMemoryBackend for HeapMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Heap
    }
}
