//! ### English
//! External allocations: hardware-visible pixel buffers with a two-phase
//! lifetime (map-for-write, then unmap-and-export).
//!
//! The phases are mutually exclusive. Mapping is scoped: the CPU pointer lives
//! only inside a [`MappedRegion`] borrow, and the region unmaps itself on every
//! exit path. Exporting consumes the backing memory's handle; the allocation
//! cannot be reused afterwards — producers request a fresh allocation per frame.
//!
//! ### 中文
//! 外部分配：具有两阶段生命周期（映射写入，然后解除映射并导出）的
//! 硬件可见像素缓冲。
//!
//! 两个阶段互斥。映射是作用域化的：CPU 指针只存在于 [`MappedRegion`]
//! 借用内部，region 在所有退出路径上都会自行解除映射。导出会消耗后备
//! 内存的句柄；此后该分配不可复用 —— 生产者每帧请求一个新的分配。

mod memfd;

#[cfg(target_os = "linux")]
pub mod gbm;

pub use memfd::MemfdAllocator;

use crate::engine::error::{AllocationError, ExportError, MapError};
use crate::engine::image::ExportDescriptor;
use crate::engine::layout::{FrameRequest, ImageLayout};

#[cfg(unix)]
use std::os::fd::OwnedFd;

/// ### English
/// Upper bound on either frame dimension accepted by allocators.
///
/// ### 中文
/// 分配器接受的帧尺寸上限（宽或高）。
pub(crate) const MAX_DIMENSION: u32 = 16_384;

/// ### English
/// Raw pointer + length of a CPU mapping, produced by a backing.
///
/// ### 中文
/// 后备存储产生的 CPU 映射裸指针与长度。
pub(crate) struct RawMapping {
    pub ptr: *mut u8,
    pub len: usize,
}

/// ### English
/// Storage backend behind an [`ExternalAllocation`] (memfd or GBM buffer
/// object). The raw layer reports failures as strings; the allocation converts
/// them at this module's boundary.
///
/// ### 中文
/// [`ExternalAllocation`] 背后的存储后端（memfd 或 GBM buffer object）。
/// 底层以字符串报告失败，由 allocation 在本模块边界处转换。
pub(crate) trait AllocationBacking: Send {
    fn map_for_write(&mut self) -> Result<RawMapping, String>;
    fn unmap(&mut self);
    #[cfg(unix)]
    fn export(&mut self) -> Result<OwnedFd, String>;
}

/// ### English
/// Allocates hardware-visible frames. One implementation per backing store;
/// selected at pipeline configuration time.
///
/// ### 中文
/// 分配硬件可见的帧。每种后备存储一个实现；在流水线配置时选定。
pub trait FrameAllocator: Send {
    fn allocate(&mut self, request: FrameRequest) -> Result<ExternalAllocation, AllocationError>;
}

/// ### English
/// Lifecycle phase of an allocation. `Mapped` exists only while a
/// [`MappedRegion`] borrow is live.
///
/// ### 中文
/// 分配的生命周期阶段。`Mapped` 仅在 [`MappedRegion`] 借用存活期间存在。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Fresh,
    Mapped,
    Written,
    Exported,
}

/// ### English
/// One hardware-visible pixel buffer with enforced map/export phases.
///
/// ### 中文
/// 一个硬件可见像素缓冲，强制执行映射/导出阶段约束。
pub struct ExternalAllocation {
    layout: ImageLayout,
    phase: Phase,
    backing: Box<dyn AllocationBacking>,
}

impl ExternalAllocation {
    pub(crate) fn new(layout: ImageLayout, backing: Box<dyn AllocationBacking>) -> Self {
        Self {
            layout,
            phase: Phase::Fresh,
            backing,
        }
    }

    #[inline]
    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// ### English
    /// Maps the buffer for CPU writes and returns the scoped region.
    ///
    /// Fails with [`MapError::AlreadyExported`] once the allocation has been
    /// exported; a live mapping is statically impossible because the region
    /// borrows the allocation mutably.
    ///
    /// ### 中文
    /// 将缓冲映射给 CPU 写入并返回作用域化的 region。
    ///
    /// 分配一旦被导出，再映射会得到 [`MapError::AlreadyExported`]；
    /// 重复映射在借用层面就不可能发生，因为 region 可变借用了分配。
    pub fn map_for_write(&mut self) -> Result<MappedRegion<'_>, MapError> {
        match self.phase {
            Phase::Exported => return Err(MapError::AlreadyExported),
            Phase::Mapped => return Err(MapError::AlreadyMapped),
            Phase::Fresh | Phase::Written => {}
        }

        let raw = self.backing.map_for_write().map_err(MapError::Backing)?;
        self.phase = Phase::Mapped;
        Ok(MappedRegion {
            ptr: raw.ptr,
            len: raw.len,
            alloc: self,
        })
    }

    /// ### English
    /// Ends the CPU phase and yields the one-time export descriptor.
    /// The mapping has already ended when this can be called (borrow rules);
    /// calling it twice fails with [`ExportError::AlreadyExported`].
    ///
    /// ### 中文
    /// 结束 CPU 阶段并产出一次性的导出描述符。
    /// 能调用到这里时映射必然已结束（借用规则）；重复调用会得到
    /// [`ExportError::AlreadyExported`]。
    #[cfg(unix)]
    pub fn unmap_and_export(&mut self) -> Result<ExportDescriptor, ExportError> {
        if self.phase == Phase::Exported {
            return Err(ExportError::AlreadyExported);
        }

        let fd = self.backing.export().map_err(ExportError::Backing)?;
        self.phase = Phase::Exported;
        Ok(ExportDescriptor::new(fd, self.layout))
    }
}

/// ### English
/// Scoped CPU view of a mapped allocation. Unmaps on drop (success, early
/// return, or panic alike).
///
/// Row helpers respect the pitch; `bytes_mut` exposes the raw region for
/// callers that address rows themselves — those writes MUST use
/// `layout().pitch`, not the nominal width, or the image shears diagonally.
///
/// ### 中文
/// 已映射分配的作用域化 CPU 视图。drop 时解除映射（无论成功、提前返回
/// 还是 panic）。
///
/// 按行辅助方法会遵守行距；`bytes_mut` 暴露原始区域给自行寻址行的调用方
/// —— 这类写入必须使用 `layout().pitch` 而不是名义宽度，否则图像会出现
/// 对角线错切。
pub struct MappedRegion<'a> {
    ptr: *mut u8,
    len: usize,
    alloc: &'a mut ExternalAllocation,
}

impl MappedRegion<'_> {
    #[inline]
    pub fn layout(&self) -> ImageLayout {
        self.alloc.layout
    }

    #[inline]
    pub fn pitch(&self) -> usize {
        self.alloc.layout.pitch as usize
    }

    /// ### English
    /// Whole mapped region, padding included.
    ///
    /// ### 中文
    /// 整个已映射区域（含填充）。
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// ### English
    /// Visible bytes of row `y` (starts at `y * pitch`, `width * bpp` long).
    ///
    /// ### 中文
    /// 第 `y` 行的可见字节（起于 `y * pitch`，长 `width * bpp`）。
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let layout = self.alloc.layout;
        debug_assert!(y < layout.size.height);
        let start = y as usize * layout.pitch as usize;
        let len = layout.row_len();
        &mut self.bytes_mut()[start..start + len]
    }

    /// ### English
    /// Writes one pixel at `(x, y)` using the pitch.
    ///
    /// ### 中文
    /// 使用行距在 `(x, y)` 写入一个像素。
    pub fn write_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        let layout = self.alloc.layout;
        debug_assert!(x < layout.size.width && y < layout.size.height);
        let offset =
            y as usize * layout.pitch as usize + x as usize * layout.format.bytes_per_pixel();
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&pixel);
    }

    /// ### English
    /// Calls `fill` once per row with `(y, visible row bytes)`.
    ///
    /// ### 中文
    /// 对每一行以 `(y, 可见行字节)` 调用一次 `fill`。
    pub fn fill_rows(&mut self, mut fill: impl FnMut(u32, &mut [u8])) {
        for y in 0..self.alloc.layout.size.height {
            fill(y, self.row_mut(y));
        }
    }
}

impl Drop for MappedRegion<'_> {
    fn drop(&mut self) {
        self.alloc.backing.unmap();
        self.alloc.phase = Phase::Written;
    }
}

/// ### English
/// Validates requested dimensions before touching any backing store.
///
/// ### 中文
/// 在接触任何后备存储之前校验请求的尺寸。
pub(crate) fn validate_request(request: &FrameRequest) -> Result<(), AllocationError> {
    let (width, height) = (request.size.width, request.size.height);
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(AllocationError::InvalidDimensions { width, height });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use dpi::PhysicalSize;

    use super::*;
    use crate::engine::layout::PixelFormat;

    fn request(width: u32, height: u32) -> FrameRequest {
        FrameRequest {
            size: PhysicalSize::new(width, height),
            format: PixelFormat::Rgba8888,
        }
    }

    #[test]
    fn rejects_invalid_dimensions() {
        let mut allocator = MemfdAllocator::new();
        assert!(matches!(
            allocator.allocate(request(0, 64)),
            Err(AllocationError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            allocator.allocate(request(64, MAX_DIMENSION + 1)),
            Err(AllocationError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn pitch_is_aligned_above_nominal_width() {
        let mut allocator = MemfdAllocator::with_pitch_align(256);
        let alloc = allocator.allocate(request(60, 4)).unwrap();
        assert_eq!(alloc.layout().row_len(), 240);
        assert_eq!(alloc.layout().pitch, 256);
    }

    #[test]
    fn map_after_export_is_a_state_machine_error() {
        let mut allocator = MemfdAllocator::new();
        let mut alloc = allocator.allocate(request(8, 8)).unwrap();
        let _descriptor = alloc.unmap_and_export().unwrap();
        assert!(matches!(
            alloc.map_for_write(),
            Err(MapError::AlreadyExported)
        ));
    }

    #[test]
    fn double_export_is_a_state_machine_error() {
        let mut allocator = MemfdAllocator::new();
        let mut alloc = allocator.allocate(request(8, 8)).unwrap();
        let _descriptor = alloc.unmap_and_export().unwrap();
        assert!(matches!(
            alloc.unmap_and_export(),
            Err(ExportError::AlreadyExported)
        ));
    }

    #[test]
    fn mapping_is_reclaimed_on_scope_exit() {
        let mut allocator = MemfdAllocator::new();
        let mut alloc = allocator.allocate(request(8, 8)).unwrap();
        {
            let mut region = alloc.map_for_write().unwrap();
            region.write_pixel(0, 0, [1, 2, 3, 4]);
        }
        // A second map is allowed once the first region ended.
        let mut region = alloc.map_for_write().unwrap();
        assert_eq!(&region.row_mut(0)[..4], &[1, 2, 3, 4]);
    }
}
