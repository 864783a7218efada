//! ### English
//! Anonymous-memory allocation backend (`memfd_create` + `mmap`).
//!
//! This is the CPU-fill path: rows are written through a shared mapping and
//! the sealed fd doubles as the export descriptor handle. The pitch is rounded
//! up to a hardware-style alignment boundary so consumers are forced to honor
//! it exactly as they must for real scan-out buffers.
//!
//! ### 中文
//! 匿名内存分配后端（`memfd_create` + `mmap`）。
//!
//! 这是 CPU 填充路径：通过共享映射写入各行，fd 同时充当导出描述符句柄。
//! 行距会向上取整到硬件风格的对齐边界，迫使消费者像对待真实扫描输出
//! 缓冲一样严格遵守它。

#[cfg(unix)]
use std::os::fd::{FromRawFd, OwnedFd};

use crate::engine::alloc::{AllocationBacking, FrameAllocator, RawMapping, validate_request};
use crate::engine::alloc::ExternalAllocation;
use crate::engine::error::AllocationError;
use crate::engine::layout::{FrameRequest, ImageLayout};

/// ### English
/// Default pitch alignment in bytes. 256 matches common scan-out hardware.
///
/// ### 中文
/// 默认行距对齐字节数。256 与常见扫描输出硬件一致。
const DEFAULT_PITCH_ALIGN: u32 = 256;

/// ### English
/// Allocator producing memfd-backed frames.
///
/// ### 中文
/// 产生以 memfd 为后备的帧的分配器。
#[derive(Clone, Copy, Debug)]
pub struct MemfdAllocator {
    pitch_align: u32,
}

impl MemfdAllocator {
    #[inline]
    pub fn new() -> Self {
        Self::with_pitch_align(DEFAULT_PITCH_ALIGN)
    }

    /// ### English
    /// Allocator with a custom pitch alignment (power of two, in bytes).
    ///
    /// ### 中文
    /// 使用自定义行距对齐（2 的幂，单位字节）的分配器。
    pub fn with_pitch_align(pitch_align: u32) -> Self {
        debug_assert!(pitch_align.is_power_of_two());
        Self { pitch_align }
    }
}

impl Default for MemfdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAllocator for MemfdAllocator {
    fn allocate(&mut self, request: FrameRequest) -> Result<ExternalAllocation, AllocationError> {
        validate_request(&request)?;

        let row = request.size.width as u64 * request.format.bytes_per_pixel() as u64;
        let align = self.pitch_align as u64;
        let pitch = row.div_ceil(align) * align;
        let layout = ImageLayout {
            size: request.size,
            format: request.format,
            pitch: pitch as u32,
        };

        let backing = platform::MemfdBacking::create(layout.byte_len())
            .map_err(AllocationError::Backing)?;
        Ok(ExternalAllocation::new(layout, Box::new(backing)))
    }
}

#[cfg(unix)]
mod platform {
    use super::*;

    /// ### English
    /// One memfd plus its optional live write mapping.
    ///
    /// ### 中文
    /// 一个 memfd 及其可选的存活写映射。
    pub(super) struct MemfdBacking {
        fd: Option<OwnedFd>,
        len: usize,
        mapped: Option<*mut u8>,
    }

    // The raw mapping pointer is only dereferenced through MappedRegion on the
    // owning thread.
    unsafe impl Send for MemfdBacking {}

    impl MemfdBacking {
        pub(super) fn create(len: usize) -> Result<Self, String> {
            let raw = unsafe { libc::memfd_create(c"dmatex-frame".as_ptr(), libc::MFD_CLOEXEC) };
            if raw < 0 {
                return Err(format!(
                    "memfd_create failed: {}",
                    std::io::Error::last_os_error()
                ));
            }
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            if unsafe { libc::ftruncate(raw, len as libc::off_t) } != 0 {
                return Err(format!(
                    "ftruncate({len}) failed: {}",
                    std::io::Error::last_os_error()
                ));
            }

            Ok(Self {
                fd: Some(fd),
                len,
                mapped: None,
            })
        }
    }

    impl AllocationBacking for MemfdBacking {
        fn map_for_write(&mut self) -> Result<RawMapping, String> {
            use std::os::fd::AsRawFd;

            let Some(fd) = &self.fd else {
                return Err("memfd was already exported".to_string());
            };
            if self.mapped.is_some() {
                return Err("memfd is already mapped".to_string());
            }

            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    self.len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd.as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(format!(
                    "mmap(PROT_WRITE) failed: {}",
                    std::io::Error::last_os_error()
                ));
            }

            let ptr = ptr.cast::<u8>();
            self.mapped = Some(ptr);
            Ok(RawMapping { ptr, len: self.len })
        }

        fn unmap(&mut self) {
            if let Some(ptr) = self.mapped.take() {
                unsafe {
                    libc::munmap(ptr.cast::<libc::c_void>(), self.len);
                }
            }
        }

        fn export(&mut self) -> Result<OwnedFd, String> {
            self.fd
                .take()
                .ok_or_else(|| "memfd was already exported".to_string())
        }
    }

    impl Drop for MemfdBacking {
        fn drop(&mut self) {
            self.unmap();
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::*;

    /// ### English
    /// Stub backing for platforms without memfd support.
    ///
    /// ### 中文
    /// 不支持 memfd 平台的占位后端。
    pub(super) struct MemfdBacking;

    impl MemfdBacking {
        pub(super) fn create(_len: usize) -> Result<Self, String> {
            Err("memfd allocations are only supported on unix platforms".to_string())
        }
    }

    impl AllocationBacking for MemfdBacking {
        fn map_for_write(&mut self) -> Result<RawMapping, String> {
            Err("memfd allocations are only supported on unix platforms".to_string())
        }

        fn unmap(&mut self) {}
    }
}
