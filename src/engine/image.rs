//! ### English
//! Export descriptors and imported images — the two sides of the zero-copy
//! boundary.
//!
//! A descriptor is an owned file descriptor plus layout metadata, usable
//! exactly once. A successful import transfers ownership of the underlying
//! memory to the image; the image destroys its backing when dropped, so the
//! mailbox and slot pair can retire superseded frames by simply dropping them.
//!
//! ### 中文
//! 导出描述符与已导入图像 —— 零拷贝边界的两侧。
//!
//! 描述符是“自有文件描述符 + 布局元数据”，只能使用一次。导入成功后，
//! 底层内存的所有权转移给图像；图像在 drop 时销毁其后备存储，
//! 因此邮箱与槽位对只需 drop 即可淘汰被取代的帧。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine::layout::ImageLayout;

#[cfg(unix)]
use std::os::fd::OwnedFd;

/// ### English
/// Opaque one-time-use handle to a hardware-visible memory region.
///
/// ### 中文
/// 指向硬件可见内存区域的不透明一次性句柄。
#[derive(Debug)]
pub struct ExportDescriptor {
    #[cfg(unix)]
    fd: OwnedFd,
    layout: ImageLayout,
}

impl ExportDescriptor {
    #[cfg(unix)]
    pub(crate) fn new(fd: OwnedFd, layout: ImageLayout) -> Self {
        Self { fd, layout }
    }

    /// ### English
    /// Layout of the region this descriptor refers to.
    ///
    /// ### 中文
    /// 该描述符所指区域的布局。
    #[inline]
    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// ### English
    /// Consumes the descriptor, yielding the owned fd and layout.
    /// Importers call this; the fd may be closed as soon as the import
    /// succeeds because ownership of the memory has transferred.
    ///
    /// ### 中文
    /// 消耗描述符，取出自有 fd 与布局。
    /// 由导入器调用；导入成功后即可关闭 fd，因为内存所有权已转移。
    #[cfg(unix)]
    pub(crate) fn into_parts(self) -> (OwnedFd, ImageLayout) {
        (self.fd, self.layout)
    }
}

/// ### English
/// Shared destruction counter attachable to imported images.
/// Tests use it to prove that overwritten mailbox frames and retired
/// double-buffer frames are destroyed rather than leaked.
///
/// ### 中文
/// 可附加到已导入图像上的共享销毁计数器。
/// 测试用它证明被邮箱覆盖或被双缓冲淘汰的帧确实被销毁而不是泄漏。
#[derive(Clone, Debug, Default)]
pub struct DestructionProbe(Arc<AtomicUsize>);

impl DestructionProbe {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Number of probed images destroyed so far.
    ///
    /// ### 中文
    /// 迄今被销毁的被探测图像数量。
    #[inline]
    pub fn destroyed(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    fn record(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// ### English
/// Backing storage of an imported image.
///
/// `Detached` represents an image whose backing was already released; binding
/// it is a lifetime bug and yields `BindError`.
///
/// ### 中文
/// 已导入图像的后备存储。
///
/// `Detached` 表示后备存储已被释放的图像；绑定它属于生命周期 bug，
/// 会产生 `BindError`。
pub(crate) enum ImageBacking {
    #[cfg(unix)]
    Mapping(ReadOnlyMapping),
    #[cfg(target_os = "linux")]
    Egl(crate::engine::gpu::egl::EglImageHandle),
    Detached,
}

/// ### English
/// GPU-importable image produced from exactly one export descriptor.
///
/// ### 中文
/// 由恰好一个导出描述符产生的可供 GPU 使用的图像。
pub struct ImportedImage {
    layout: ImageLayout,
    backing: ImageBacking,
    probe: Option<DestructionProbe>,
}

impl ImportedImage {
    pub(crate) fn new(layout: ImageLayout, backing: ImageBacking) -> Self {
        Self {
            layout,
            backing,
            probe: None,
        }
    }

    /// ### English
    /// An image whose backing is already gone. Only useful for exercising the
    /// `BindError` path.
    ///
    /// ### 中文
    /// 后备存储已不存在的图像。仅用于触发 `BindError` 路径。
    pub fn detached(layout: ImageLayout) -> Self {
        Self::new(layout, ImageBacking::Detached)
    }

    #[inline]
    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// ### English
    /// Whether the backing is still live (bindable).
    ///
    /// ### 中文
    /// 后备存储是否仍然存活（可绑定）。
    #[inline]
    pub fn is_alive(&self) -> bool {
        !matches!(self.backing, ImageBacking::Detached)
    }

    /// ### English
    /// Attaches a destruction probe, ticked when this image is dropped.
    ///
    /// ### 中文
    /// 附加销毁探针，图像被 drop 时计数。
    pub fn set_probe(&mut self, probe: DestructionProbe) {
        self.probe = Some(probe);
    }

    pub(crate) fn backing(&self) -> &ImageBacking {
        &self.backing
    }
}

impl Drop for ImportedImage {
    fn drop(&mut self) {
        if let Some(probe) = &self.probe {
            probe.record();
        }
    }
}

impl std::fmt::Debug for ImportedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedImage")
            .field("layout", &self.layout)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// ### English
/// Read-only CPU mapping of an exported region (software import path).
/// The mapping keeps the memory alive after the descriptor fd is closed;
/// `munmap` runs on drop.
///
/// ### 中文
/// 导出区域的只读 CPU 映射（软件导入路径）。
/// 描述符 fd 关闭后由映射保持内存存活；drop 时执行 `munmap`。
#[cfg(unix)]
pub(crate) struct ReadOnlyMapping {
    ptr: *const u8,
    len: usize,
}

#[cfg(unix)]
unsafe impl Send for ReadOnlyMapping {}
#[cfg(unix)]
unsafe impl Sync for ReadOnlyMapping {}

#[cfg(unix)]
impl ReadOnlyMapping {
    /// ### English
    /// Maps `len` bytes of `fd` read-only and shared. No pixel data is copied.
    ///
    /// ### 中文
    /// 将 `fd` 的 `len` 字节以只读共享方式映射。不拷贝任何像素数据。
    pub(crate) fn map(fd: std::os::fd::BorrowedFd<'_>, len: usize) -> Result<Self, String> {
        use std::os::fd::AsRawFd;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(format!(
                "mmap(PROT_READ) failed: errno {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(Self {
            ptr: ptr.cast_const().cast::<u8>(),
            len,
        })
    }

    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

#[cfg(unix)]
impl Drop for ReadOnlyMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast_mut().cast::<libc::c_void>(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpi::PhysicalSize;

    use crate::engine::layout::PixelFormat;

    fn layout() -> ImageLayout {
        ImageLayout {
            size: PhysicalSize::new(4, 4),
            format: PixelFormat::Rgba8888,
            pitch: 16,
        }
    }

    #[test]
    fn probe_counts_drops() {
        let probe = DestructionProbe::new();
        let mut image = ImportedImage::detached(layout());
        image.set_probe(probe.clone());
        assert_eq!(probe.destroyed(), 0);
        drop(image);
        assert_eq!(probe.destroyed(), 1);
    }

    #[test]
    fn detached_images_are_not_alive() {
        assert!(!ImportedImage::detached(layout()).is_alive());
    }
}
