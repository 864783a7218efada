//! ### English
//! Pixel formats and image layout metadata shared by allocations, export
//! descriptors, and imported images.
//!
//! ### 中文
//! 像素格式与图像布局元数据，由分配、导出描述符与已导入图像共享。

use dpi::PhysicalSize;

/// ### English
/// Builds a DRM FourCC code from its four ASCII bytes.
///
/// ### 中文
/// 由四个 ASCII 字节构造 DRM FourCC 码。
const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

/// ### English
/// Pixel format tag for a single-plane 32-bit frame.
///
/// The variant names describe byte order in memory, lowest address first.
///
/// ### 中文
/// 单平面 32 位帧的像素格式标签。
///
/// 变体名描述内存中的字节顺序（低地址在前）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum PixelFormat {
    Rgba8888,
    Bgra8888,
}

impl PixelFormat {
    /// ### English
    /// Bytes per pixel (always 4 for the supported formats).
    ///
    /// ### 中文
    /// 每像素字节数（受支持格式均为 4）。
    #[inline]
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// ### English
    /// DRM FourCC code used by dma-buf export descriptors.
    ///
    /// DRM names formats by little-endian packed value, so bytes `R,G,B,A` in
    /// memory are `DRM_FORMAT_ABGR8888` and `B,G,R,A` are `DRM_FORMAT_ARGB8888`.
    ///
    /// ### 中文
    /// dma-buf 导出描述符使用的 DRM FourCC 码。
    ///
    /// DRM 按小端打包值命名格式：内存中的 `R,G,B,A` 字节对应
    /// `DRM_FORMAT_ABGR8888`，`B,G,R,A` 对应 `DRM_FORMAT_ARGB8888`。
    #[inline]
    pub const fn drm_fourcc(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 => fourcc(b'A', b'B', b'2', b'4'),
            PixelFormat::Bgra8888 => fourcc(b'A', b'R', b'2', b'4'),
        }
    }
}

/// ### English
/// What the caller asks an allocator for: dimensions and pixel format.
/// The allocator decides the pitch.
///
/// ### 中文
/// 调用方向分配器请求的内容：尺寸与像素格式。
/// 行距由分配器决定。
#[derive(Clone, Copy, Debug)]
pub struct FrameRequest {
    pub size: PhysicalSize<u32>,
    pub format: PixelFormat,
}

/// ### English
/// Complete memory layout of an allocated frame.
///
/// `pitch` is the byte distance between row starts and may exceed
/// `width * bytes_per_pixel` because of hardware alignment; every row access
/// must use it instead of the nominal width.
///
/// ### 中文
/// 已分配帧的完整内存布局。
///
/// `pitch` 是相邻两行起点之间的字节距离，因硬件对齐可能大于
/// `width * bytes_per_pixel`；所有按行访问都必须使用它而不是名义宽度。
#[derive(Clone, Copy, Debug)]
pub struct ImageLayout {
    pub size: PhysicalSize<u32>,
    pub format: PixelFormat,
    pub pitch: u32,
}

impl ImageLayout {
    /// ### English
    /// Total byte length of the pixel region (`pitch * height`).
    ///
    /// ### 中文
    /// 像素区域总字节数（`pitch * height`）。
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.pitch as usize * self.size.height as usize
    }

    /// ### English
    /// Byte length of one visible row (`width * bytes_per_pixel`), excluding
    /// alignment padding.
    ///
    /// ### 中文
    /// 单个可见行的字节数（`width * bytes_per_pixel`），不含对齐填充。
    #[inline]
    pub fn row_len(&self) -> usize {
        self.size.width as usize * self.format.bytes_per_pixel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_codes_match_drm_names() {
        assert_eq!(PixelFormat::Rgba8888.drm_fourcc(), 0x3432_4241); // 'AB24'
        assert_eq!(PixelFormat::Bgra8888.drm_fourcc(), 0x3432_5241); // 'AR24'
    }

    #[test]
    fn layout_lengths_respect_pitch() {
        let layout = ImageLayout {
            size: PhysicalSize::new(60, 4),
            format: PixelFormat::Rgba8888,
            pitch: 256,
        };
        assert_eq!(layout.row_len(), 240);
        assert_eq!(layout.byte_len(), 1024);
    }
}
