//! ### English
//! GPU backends behind the zero-copy boundary.
//!
//! [`DescriptorImporter`] is the producer-thread side: it turns a one-time
//! export descriptor into an [`ImportedImage`] without touching pixel data.
//! [`GpuContext`] is the render-thread side: texture slots, binding, drawing,
//! and presentation. Importers are context-independent on every backend here
//! (EGL dma-buf import accepts `EGL_NO_CONTEXT`), so producers never need the
//! graphics context.
//!
//! ### 中文
//! 零拷贝边界后面的 GPU 后端。
//!
//! [`DescriptorImporter`] 是生产者线程一侧：把一次性的导出描述符转换为
//! [`ImportedImage`]，不接触像素数据。[`GpuContext`] 是渲染线程一侧：
//! 纹理槽位、绑定、绘制与呈现。此处所有后端的导入器都与上下文无关
//! （EGL dma-buf 导入接受 `EGL_NO_CONTEXT`），因此生产者永远不需要图形
//! 上下文。

pub mod software;

#[cfg(target_os = "linux")]
pub mod egl;

use std::sync::Arc;

use dpi::PhysicalSize;

use crate::engine::alloc::{FrameAllocator, MemfdAllocator};
use crate::engine::error::{BindError, DeviceContextError, ImportError};
use crate::engine::image::{ExportDescriptor, ImportedImage};
use crate::engine::slots::TextureSlot;

/// ### English
/// Converts an export descriptor into a GPU-importable image. Zero-copy: no
/// second pixel buffer, no blocking full-frame transfer. `Send + Sync` so
/// producer threads can import without the render thread.
///
/// ### 中文
/// 将导出描述符转换为可供 GPU 使用的图像。零拷贝：没有第二个像素缓冲，
/// 也没有阻塞式整帧传输。`Send + Sync`，生产者线程无需渲染线程即可导入。
pub trait DescriptorImporter: Send + Sync {
    fn import(&self, descriptor: ExportDescriptor) -> Result<ImportedImage, ImportError>;
}

/// ### English
/// Render-thread graphics context: slot creation, binding, drawing, and
/// presentation. Not `Send`; it stays on the thread that created it.
///
/// ### 中文
/// 渲染线程的图形上下文：槽位创建、绑定、绘制与呈现。非 `Send`；
/// 始终留在创建它的线程上。
pub trait GpuContext {
    /// ### English
    /// Importer handle shareable with producer threads.
    ///
    /// ### 中文
    /// 可分享给生产者线程的导入器句柄。
    fn importer(&self) -> Arc<dyn DescriptorImporter>;

    /// ### English
    /// Allocates a texture slot. The texture name is created once here and
    /// reused across every subsequent bind.
    ///
    /// ### 中文
    /// 分配一个纹理槽位。纹理名在此一次性创建，并在之后的每次绑定中复用。
    fn create_slot(&mut self) -> Result<TextureSlot, DeviceContextError>;

    /// ### English
    /// Binds `image` as the slot's sampling source and returns the previously
    /// bound image (the caller decides when to destroy it). Fails only if the
    /// image's backing was already destroyed.
    ///
    /// ### 中文
    /// 将 `image` 绑定为槽位的采样源，并返回先前绑定的图像（何时销毁由
    /// 调用方决定）。仅当图像的后备存储已被销毁时失败。
    fn bind_slot(
        &mut self,
        slot: &mut TextureSlot,
        image: ImportedImage,
    ) -> Result<Option<ImportedImage>, BindError>;

    /// ### English
    /// Draws a full-frame quad sampling the slot's texture.
    ///
    /// ### 中文
    /// 绘制一个采样该槽位纹理的全幅四边形。
    fn draw(&mut self, slot: &TextureSlot) -> Result<(), DeviceContextError>;

    /// ### English
    /// Presents the drawn frame. Failure is fatal to the pipeline.
    ///
    /// ### 中文
    /// 呈现已绘制的帧。失败对流水线而言是致命的。
    fn present(&mut self) -> Result<(), DeviceContextError>;

    /// ### English
    /// Reads the rendered target back as tightly packed RGBA rows, where the
    /// backend supports it. `None` means readback is unsupported.
    ///
    /// ### 中文
    /// 在后端支持时，将渲染目标读回为紧密排列的 RGBA 行。`None` 表示
    /// 不支持读回。
    fn read_back(&mut self) -> Option<Vec<u8>>;
}

/// ### English
/// Backend selection, decided at pipeline configuration time.
///
/// ### 中文
/// 后端选择，在流水线配置时决定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// EGL if the platform stack is available, software otherwise.
    Auto,
    /// EGL/GLES with GBM dma-buf allocations.
    Egl,
    /// In-process software sampling with memfd allocations.
    Software,
}

/// ### English
/// Creates the context/allocator pair for `kind`. `Auto` tries the EGL stack
/// first and falls back to the software backend with a warning.
///
/// ### 中文
/// 为 `kind` 创建上下文/分配器对。`Auto` 先尝试 EGL 栈，失败则带警告
/// 回退到软件后端。
pub fn create_backend(
    kind: BackendKind,
    size: PhysicalSize<u32>,
) -> Result<(Box<dyn GpuContext>, Box<dyn FrameAllocator>), DeviceContextError> {
    match kind {
        BackendKind::Software => Ok(software_backend(size)),
        BackendKind::Egl => egl_backend(size),
        BackendKind::Auto => match egl_backend(size) {
            Ok(pair) => Ok(pair),
            Err(err) => {
                tracing::warn!(error = %err, "EGL backend unavailable; using software backend");
                Ok(software_backend(size))
            }
        },
    }
}

fn software_backend(size: PhysicalSize<u32>) -> (Box<dyn GpuContext>, Box<dyn FrameAllocator>) {
    (
        Box::new(software::SoftwareContext::new(size)),
        Box::new(MemfdAllocator::new()),
    )
}

#[cfg(target_os = "linux")]
fn egl_backend(
    size: PhysicalSize<u32>,
) -> Result<(Box<dyn GpuContext>, Box<dyn FrameAllocator>), DeviceContextError> {
    use crate::engine::alloc::gbm::GbmAllocator;

    let context = egl::EglContext::new(size)?;
    let allocator = GbmAllocator::open()
        .map_err(|err| DeviceContextError::Unavailable(format!("GBM allocator: {err}")))?;
    Ok((Box::new(context), Box::new(allocator)))
}

#[cfg(not(target_os = "linux"))]
fn egl_backend(
    _size: PhysicalSize<u32>,
) -> Result<(Box<dyn GpuContext>, Box<dyn FrameAllocator>), DeviceContextError> {
    Err(DeviceContextError::Unavailable(
        "the EGL/GBM backend is only supported on Linux".to_string(),
    ))
}
