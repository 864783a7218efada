//! ### English
//! Frame producer thread: allocate, fill on the CPU, export, import, deposit.
//!
//! Each frame goes through a fresh allocation, so the map/export state machine
//! never has to be rewound. Fills always go through the pitch-aware row
//! helpers. A failed import after the first accepted frame is logged and
//! skipped — the consumer keeps showing the previous frame — matching the
//! mailbox's latest-wins stance.
//!
//! ### 中文
//! 帧生产者线程：分配、CPU 填充、导出、导入、投递。
//!
//! 每帧都经过一个全新的分配，因此映射/导出状态机永远不需要回退。
//! 填充始终通过感知行距的按行辅助方法进行。首帧被接受之后的导入失败
//! 只记录并跳过 —— 消费者继续显示上一帧 —— 与邮箱“最新者胜”的立场
//! 一致。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dpi::PhysicalSize;

use crate::engine::alloc::{FrameAllocator, MappedRegion};
use crate::engine::error::PipelineError;
use crate::engine::gpu::DescriptorImporter;
use crate::engine::layout::{FrameRequest, PixelFormat};
use crate::engine::mailbox::FrameMailbox;
use crate::engine::pipeline::PipelineStats;

/// ### English
/// What the producer fills frames with.
///
/// ### 中文
/// 生产者用什么内容填充帧。
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ProducerKind {
    /// Animated gradient, no input files needed.
    Pattern,
    /// Decoded image sources, switchable at runtime.
    Decode,
}

/// ### English
/// One decoded source, tightly packed RGBA.
///
/// ### 中文
/// 一个已解码的源，紧密排列的 RGBA。
pub(crate) struct DecodedImage {
    pub size: PhysicalSize<u32>,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    /// ### English
    /// Decodes an in-memory file (JPEG or PNG) to RGBA.
    ///
    /// ### 中文
    /// 将内存中的文件（JPEG 或 PNG）解码为 RGBA。
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, PipelineError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| PipelineError::Config(format!("source failed to decode: {err}")))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self {
            size: PhysicalSize::new(width, height),
            rgba: decoded.into_raw(),
        })
    }
}

/// ### English
/// Frame content source. `Decode` reads the active-source index on every
/// frame, so a switch takes effect on the next produced frame.
///
/// ### 中文
/// 帧内容来源。`Decode` 每帧都读取活动源索引，因此切换在下一个生产的
/// 帧上生效。
pub(crate) enum Content {
    Pattern {
        size: PhysicalSize<u32>,
        format: PixelFormat,
    },
    Decode {
        frames: Vec<DecodedImage>,
        active: Arc<AtomicUsize>,
        format: PixelFormat,
    },
}

impl Content {
    fn request(&self) -> FrameRequest {
        match self {
            Content::Pattern { size, format } => FrameRequest {
                size: *size,
                format: *format,
            },
            Content::Decode {
                frames,
                active,
                format,
            } => {
                let index = active.load(Ordering::Relaxed).min(frames.len() - 1);
                FrameRequest {
                    size: frames[index].size,
                    format: *format,
                }
            }
        }
    }

    fn fill(&self, frame: u64, region: &mut MappedRegion<'_>) {
        let format = region.layout().format;
        match self {
            Content::Pattern { .. } => {
                region.fill_rows(|y, row| {
                    for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                        let rgba = [
                            ((x as u64 + frame * 5) % 256) as u8,
                            ((y as u64 + frame * 3) % 256) as u8,
                            ((frame * 10) % 256) as u8,
                            255,
                        ];
                        pixel.copy_from_slice(&channel_order(rgba, format));
                    }
                });
            }
            Content::Decode { frames, active, .. } => {
                let index = active.load(Ordering::Relaxed).min(frames.len() - 1);
                let source = &frames[index];
                // The active source may have switched since the allocation was
                // sized, so copies are clamped to both layouts.
                let src_row_len = source.size.width as usize * 4;
                let copy_rows = region.layout().size.height.min(source.size.height);
                let copy_len = region.layout().row_len().min(src_row_len);
                region.fill_rows(|y, row| {
                    if y >= copy_rows {
                        return;
                    }
                    let start = y as usize * src_row_len;
                    let src = &source.rgba[start..start + copy_len];
                    match format {
                        PixelFormat::Rgba8888 => row[..copy_len].copy_from_slice(src),
                        PixelFormat::Bgra8888 => {
                            for (dst, texel) in
                                row[..copy_len].chunks_exact_mut(4).zip(src.chunks_exact(4))
                            {
                                dst.copy_from_slice(&[texel[2], texel[1], texel[0], texel[3]]);
                            }
                        }
                    }
                });
            }
        }
    }
}

fn channel_order(rgba: [u8; 4], format: PixelFormat) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8888 => rgba,
        PixelFormat::Bgra8888 => [rgba[2], rgba[1], rgba[0], rgba[3]],
    }
}

/// ### English
/// Spawns the producer thread. It runs until `stop` is raised, depositing one
/// frame per interval. Allocation exhaustion backs off and retries; import
/// failures skip the frame (the mailbox keeps its previous content only until
/// the consumer takes it, so the screen simply keeps the last accepted frame).
///
/// ### 中文
/// 启动生产者线程。它运行到 `stop` 被置起为止，每个间隔投递一帧。
/// 分配耗尽时退避重试；导入失败则跳过该帧（屏幕会停留在最后被接受的
/// 帧上）。
pub(crate) fn spawn(
    mut allocator: Box<dyn FrameAllocator>,
    importer: Arc<dyn DescriptorImporter>,
    mailbox: Arc<FrameMailbox>,
    stop: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    content: Content,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("dmatex-producer".to_string())
        .spawn(move || {
            let mut frame: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                let started = Instant::now();

                if produce_one(&mut *allocator, &*importer, &mailbox, &stats, &content, frame) {
                    frame += 1;
                } else if stop.load(Ordering::Relaxed) {
                    break;
                }

                let elapsed = started.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
            tracing::debug!(frames = frame, "producer stopped");
        })
}

/// ### English
/// One full producer cycle. Returns `true` when a frame was deposited.
///
/// ### 中文
/// 一个完整的生产者周期。投递成功时返回 `true`。
fn produce_one(
    allocator: &mut dyn FrameAllocator,
    importer: &dyn DescriptorImporter,
    mailbox: &FrameMailbox,
    stats: &PipelineStats,
    content: &Content,
    frame: u64,
) -> bool {
    let mut allocation = match allocator.allocate(content.request()) {
        Ok(allocation) => allocation,
        Err(err) => {
            tracing::warn!(frame, error = %err, "frame allocation failed, backing off");
            stats.record_allocation_failure();
            std::thread::sleep(Duration::from_millis(2));
            return false;
        }
    };

    match allocation.map_for_write() {
        Ok(mut region) => content.fill(frame, &mut region),
        Err(err) => {
            tracing::warn!(frame, error = %err, "mapping failed, skipping frame");
            return false;
        }
    }

    let descriptor = match allocation.unmap_and_export() {
        Ok(descriptor) => descriptor,
        Err(err) => {
            tracing::warn!(frame, error = %err, "export failed, skipping frame");
            return false;
        }
    };

    match importer.import(descriptor) {
        Ok(image) => {
            mailbox.deposit(image);
            stats.record_produced();
            true
        }
        Err(err) => {
            // Stale-frame policy: the consumer keeps the last accepted frame.
            tracing::warn!(frame, error = %err, "descriptor import rejected, skipping frame");
            stats.record_import_failure();
            false
        }
    }
}
