//! ### English
//! Software backend: imports descriptors by read-only mapping and draws by
//! nearest sampling into an in-process RGBA target.
//!
//! The zero-copy contract holds here too — import maps the exported memory, it
//! never copies a frame into a staging buffer. Sampling addresses rows by the
//! layout pitch, so a consumer that confused pitch with width would shear the
//! readback exactly like it would on hardware. The context also journals every
//! bind and draw, which is what the swap-ordering tests inspect.
//!
//! ### 中文
//! 软件后端：通过只读映射导入描述符，并以最近邻采样绘制到进程内的
//! RGBA 目标。
//!
//! 零拷贝契约在此同样成立 —— 导入即映射被导出的内存，绝不把帧拷贝进
//! 暂存缓冲。采样按布局行距寻址行，因此把行距误当宽度的消费者会像在
//! 真实硬件上一样让读回结果错切。上下文还会记录每次绑定与绘制，
//! 交换顺序测试检查的就是这份日志。

use std::sync::Arc;

use dpi::PhysicalSize;

use crate::engine::error::{BindError, DeviceContextError, ImportError};
use crate::engine::gpu::{DescriptorImporter, GpuContext};
use crate::engine::image::{ExportDescriptor, ImageBacking, ImportedImage};
use crate::engine::layout::PixelFormat;
use crate::engine::slots::TextureSlot;

/// ### English
/// Background color of the render target before any frame is drawn.
///
/// ### 中文
/// 绘制任何帧之前渲染目标的背景色。
const CLEAR_COLOR: [u8; 4] = [51, 51, 51, 255];

/// ### English
/// Slot activity record, in call order.
///
/// ### 中文
/// 按调用顺序记录的槽位活动。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotEvent {
    Bound(u32),
    Drew(u32),
}

/// ### English
/// Importer backed by read-only shared mappings. Context-independent, like
/// dma-buf import on the EGL backend.
///
/// ### 中文
/// 以只读共享映射为后备的导入器。与上下文无关，如同 EGL 后端的
/// dma-buf 导入。
pub struct SoftwareImporter {
    attached: bool,
}

impl SoftwareImporter {
    pub fn new() -> Self {
        Self { attached: true }
    }

    /// ### English
    /// Importer with no live context behind it; every import fails with
    /// [`ImportError::ContextMissing`].
    ///
    /// ### 中文
    /// 背后没有存活上下文的导入器；所有导入都以
    /// [`ImportError::ContextMissing`] 失败。
    pub fn detached() -> Self {
        Self { attached: false }
    }
}

impl Default for SoftwareImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorImporter for SoftwareImporter {
    fn import(&self, descriptor: ExportDescriptor) -> Result<ImportedImage, ImportError> {
        if !self.attached {
            return Err(ImportError::ContextMissing);
        }

        let layout = descriptor.layout();
        if layout.size.width == 0 || layout.size.height == 0 {
            return Err(ImportError::BadDescriptor(format!(
                "degenerate size {}x{}",
                layout.size.width, layout.size.height
            )));
        }
        if (layout.pitch as usize) < layout.row_len() {
            return Err(ImportError::BadDescriptor(format!(
                "pitch {} is smaller than the row length {}",
                layout.pitch,
                layout.row_len()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::fd::AsFd;

            use crate::engine::image::ReadOnlyMapping;

            let (fd, layout) = descriptor.into_parts();
            let mapping = ReadOnlyMapping::map(fd.as_fd(), layout.byte_len())
                .map_err(ImportError::Rejected)?;
            // The fd closes here; the mapping keeps the memory alive.
            Ok(ImportedImage::new(layout, ImageBacking::Mapping(mapping)))
        }
        #[cfg(not(unix))]
        {
            Err(ImportError::Rejected(
                "software import needs fd mappings, unavailable on this platform".to_string(),
            ))
        }
    }
}

/// ### English
/// In-process render context. Draw scales the front image over the whole
/// target with nearest sampling; `read_back` returns the target pixels.
///
/// ### 中文
/// 进程内渲染上下文。绘制用最近邻采样把前台图像缩放到整个目标；
/// `read_back` 返回目标像素。
pub struct SoftwareContext {
    size: PhysicalSize<u32>,
    target: Vec<u8>,
    next_name: u32,
    importer: Arc<SoftwareImporter>,
    journal: Vec<SlotEvent>,
    presented: u64,
}

impl SoftwareContext {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        let mut target = Vec::with_capacity(size.width as usize * size.height as usize * 4);
        for _ in 0..size.width as usize * size.height as usize {
            target.extend_from_slice(&CLEAR_COLOR);
        }
        Self {
            size,
            target,
            next_name: 0,
            importer: Arc::new(SoftwareImporter::new()),
            journal: Vec::new(),
            presented: 0,
        }
    }

    /// ### English
    /// Target pixel at `(x, y)`, RGBA.
    ///
    /// ### 中文
    /// 目标在 `(x, y)` 处的像素（RGBA）。
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        assert!(x < self.size.width && y < self.size.height);
        let offset = (y as usize * self.size.width as usize + x as usize) * 4;
        self.target[offset..offset + 4].try_into().unwrap()
    }

    /// ### English
    /// Bind/draw journal since creation.
    ///
    /// ### 中文
    /// 自创建以来的绑定/绘制日志。
    #[inline]
    pub fn journal(&self) -> &[SlotEvent] {
        &self.journal
    }

    /// ### English
    /// Frames presented so far.
    ///
    /// ### 中文
    /// 迄今呈现的帧数。
    #[inline]
    pub fn presented(&self) -> u64 {
        self.presented
    }

    fn sample(&mut self, image: &ImportedImage) {
        let bytes = match image.backing() {
            #[cfg(unix)]
            ImageBacking::Mapping(mapping) => mapping.bytes(),
            _ => return,
        };

        let layout = image.layout();
        let (src_w, src_h) = (layout.size.width as usize, layout.size.height as usize);
        let pitch = layout.pitch as usize;
        let bpp = layout.format.bytes_per_pixel();
        let (dst_w, dst_h) = (self.size.width as usize, self.size.height as usize);

        for dy in 0..dst_h {
            let sy = dy * src_h / dst_h;
            let src_row = &bytes[sy * pitch..sy * pitch + src_w * bpp];
            let dst_row = &mut self.target[dy * dst_w * 4..(dy + 1) * dst_w * 4];
            for dx in 0..dst_w {
                let sx = dx * src_w / dst_w;
                let texel: [u8; 4] = src_row[sx * bpp..sx * bpp + 4].try_into().unwrap();
                let rgba = match layout.format {
                    PixelFormat::Rgba8888 => texel,
                    PixelFormat::Bgra8888 => [texel[2], texel[1], texel[0], texel[3]],
                };
                dst_row[dx * 4..dx * 4 + 4].copy_from_slice(&rgba);
            }
        }
    }
}

impl GpuContext for SoftwareContext {
    fn importer(&self) -> Arc<dyn DescriptorImporter> {
        self.importer.clone()
    }

    fn create_slot(&mut self) -> Result<TextureSlot, DeviceContextError> {
        let name = self.next_name;
        self.next_name += 1;
        Ok(TextureSlot::new(name))
    }

    fn bind_slot(
        &mut self,
        slot: &mut TextureSlot,
        image: ImportedImage,
    ) -> Result<Option<ImportedImage>, BindError> {
        if !image.is_alive() {
            return Err(BindError::ImageDestroyed);
        }
        self.journal.push(SlotEvent::Bound(slot.name()));
        Ok(slot.replace(image))
    }

    fn draw(&mut self, slot: &TextureSlot) -> Result<(), DeviceContextError> {
        self.journal.push(SlotEvent::Drew(slot.name()));
        match slot.bound() {
            Some(image) => self.sample(image),
            None => {
                for pixel in self.target.chunks_exact_mut(4) {
                    pixel.copy_from_slice(&CLEAR_COLOR);
                }
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceContextError> {
        self.presented += 1;
        Ok(())
    }

    fn read_back(&mut self) -> Option<Vec<u8>> {
        Some(self.target.clone())
    }
}
