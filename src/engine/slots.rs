//! ### English
//! Texture slots and the double-buffered slot pair.
//!
//! A slot owns one reusable texture name; rebinding replaces the sampling
//! source without recreating the texture. The pair enforces the swap policy:
//! a new frame is bound into the back slot, then front and back swap, so the
//! displayed texture never changes underneath an in-flight draw. The image
//! superseded by the bind is parked in `retired` and destroyed only after the
//! next draw has completed.
//!
//! ### 中文
//! 纹理槽位与双缓冲槽位对。
//!
//! 槽位拥有一个可复用的纹理名；重新绑定只替换采样源而不重建纹理。
//! 槽位对强制执行交换策略：新帧先绑定到后槽位，随后前后槽位交换，
//! 因此正在显示的纹理绝不会在绘制进行中被改动。被绑定取代的图像
//! 存放在 `retired` 中，直到下一次绘制完成后才销毁。

use crate::engine::error::{BindError, DeviceContextError};
use crate::engine::gpu::GpuContext;
use crate::engine::image::ImportedImage;

/// ### English
/// One texture name plus the image currently bound to it.
///
/// ### 中文
/// 一个纹理名及其当前绑定的图像。
pub struct TextureSlot {
    name: u32,
    bound: Option<ImportedImage>,
}

impl TextureSlot {
    pub(crate) fn new(name: u32) -> Self {
        Self { name, bound: None }
    }

    /// ### English
    /// Backend texture name. Stable for the slot's whole lifetime.
    ///
    /// ### 中文
    /// 后端纹理名。在槽位的整个生命周期内保持不变。
    #[inline]
    pub fn name(&self) -> u32 {
        self.name
    }

    /// ### English
    /// Image the slot currently samples from, if any.
    ///
    /// ### 中文
    /// 槽位当前采样的图像（如果有）。
    #[inline]
    pub fn bound(&self) -> Option<&ImportedImage> {
        self.bound.as_ref()
    }

    /// ### English
    /// Swaps in `image` and hands back the previously bound one.
    ///
    /// ### 中文
    /// 换入 `image` 并交回先前绑定的图像。
    pub(crate) fn replace(&mut self, image: ImportedImage) -> Option<ImportedImage> {
        self.bound.replace(image)
    }
}

/// ### English
/// Front/back texture slot pair implementing bind-into-back-then-swap.
///
/// ### 中文
/// 实现“先绑定到后槽位再交换”的前/后纹理槽位对。
pub struct SlotPair {
    front: TextureSlot,
    back: TextureSlot,
    retired: Option<ImportedImage>,
}

impl SlotPair {
    /// ### English
    /// Creates both slots up front; no texture names are allocated afterwards.
    ///
    /// ### 中文
    /// 预先创建两个槽位；之后不再分配任何纹理名。
    pub fn create(ctx: &mut dyn GpuContext) -> Result<Self, DeviceContextError> {
        Ok(Self {
            front: ctx.create_slot()?,
            back: ctx.create_slot()?,
            retired: None,
        })
    }

    /// ### English
    /// Accepts a new frame: binds it into the back slot, swaps front and back,
    /// and parks the superseded image until [`SlotPair::release_retired`].
    /// The front texture is never rebound in place.
    ///
    /// ### 中文
    /// 接受新帧：绑定到后槽位，交换前后槽位，并把被取代的图像暂存到
    /// [`SlotPair::release_retired`] 之前。前槽位纹理绝不被就地重绑。
    pub fn accept(
        &mut self,
        ctx: &mut dyn GpuContext,
        image: ImportedImage,
    ) -> Result<(), BindError> {
        let superseded = ctx.bind_slot(&mut self.back, image)?;
        std::mem::swap(&mut self.front, &mut self.back);
        if superseded.is_some() {
            // Replaces any image still parked; its draw finished two swaps ago.
            self.retired = superseded;
        }
        Ok(())
    }

    /// ### English
    /// Slot currently designated for drawing.
    ///
    /// ### 中文
    /// 当前被指定用于绘制的槽位。
    #[inline]
    pub fn front(&self) -> &TextureSlot {
        &self.front
    }

    /// ### English
    /// Whether any frame has ever been accepted.
    ///
    /// ### 中文
    /// 是否已接受过任何帧。
    #[inline]
    pub fn has_frame(&self) -> bool {
        self.front.bound.is_some()
    }

    /// ### English
    /// Destroys the image superseded by the last accept. The render loop calls
    /// this after the draw that follows the swap, so no in-flight draw can
    /// still reference the image.
    ///
    /// ### 中文
    /// 销毁上次 accept 所取代的图像。渲染循环在交换后的那次绘制之后调用
    /// 此方法，因此不会有进行中的绘制仍引用该图像。
    pub fn release_retired(&mut self) {
        self.retired = None;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use dpi::PhysicalSize;

    use super::*;
    use crate::engine::alloc::{FrameAllocator, MemfdAllocator};
    use crate::engine::gpu::DescriptorImporter;
    use crate::engine::gpu::software::{SlotEvent, SoftwareContext};
    use crate::engine::image::{DestructionProbe, ImportedImage};
    use crate::engine::layout::{FrameRequest, ImageLayout, PixelFormat};

    fn sample_image(ctx: &SoftwareContext, probe: &DestructionProbe) -> ImportedImage {
        let mut allocator = MemfdAllocator::new();
        let mut alloc = allocator
            .allocate(FrameRequest {
                size: PhysicalSize::new(4, 4),
                format: PixelFormat::Rgba8888,
            })
            .unwrap();
        let descriptor = alloc.unmap_and_export().unwrap();
        let mut image = ctx
            .importer()
            .import(descriptor)
            .expect("software import must succeed");
        image.set_probe(probe.clone());
        image
    }

    #[test]
    fn binding_a_destroyed_image_fails() {
        let mut ctx = SoftwareContext::new(PhysicalSize::new(8, 8));
        let mut pair = SlotPair::create(&mut ctx).unwrap();
        let dead = ImportedImage::detached(ImageLayout {
            size: PhysicalSize::new(4, 4),
            format: PixelFormat::Rgba8888,
            pitch: 16,
        });
        assert!(matches!(
            pair.accept(&mut ctx, dead),
            Err(BindError::ImageDestroyed)
        ));
        assert!(!pair.has_frame());
    }

    #[test]
    fn texture_names_are_allocated_once_and_reused() {
        let mut ctx = SoftwareContext::new(PhysicalSize::new(8, 8));
        let mut pair = SlotPair::create(&mut ctx).unwrap();
        let probe = DestructionProbe::new();

        for _ in 0..6 {
            let image = sample_image(&ctx, &probe);
            pair.accept(&mut ctx, image).unwrap();
            ctx.draw(pair.front()).unwrap();
            pair.release_retired();
        }

        // Every bind reuses one of the two names created at startup.
        let extra = ctx.create_slot().unwrap();
        assert_eq!(extra.name(), 2);
    }

    #[test]
    fn a_slot_is_never_rebound_between_its_draw_and_the_swap() {
        let mut ctx = SoftwareContext::new(PhysicalSize::new(8, 8));
        let mut pair = SlotPair::create(&mut ctx).unwrap();
        let probe = DestructionProbe::new();

        for _ in 0..5 {
            let image = sample_image(&ctx, &probe);
            pair.accept(&mut ctx, image).unwrap();
            ctx.draw(pair.front()).unwrap();
            pair.release_retired();
        }

        // A bind must never target the name drawn immediately before it.
        let journal = ctx.journal();
        for (i, event) in journal.iter().enumerate() {
            if let SlotEvent::Bound(name) = event {
                let last_draw = journal[..i]
                    .iter()
                    .rev()
                    .find_map(|e| match e {
                        SlotEvent::Drew(n) => Some(*n),
                        SlotEvent::Bound(_) => None,
                    });
                assert_ne!(last_draw, Some(*name), "bound into the just-drawn slot");
            }
        }
    }

    #[test]
    fn superseded_images_are_destroyed_only_after_release() {
        let mut ctx = SoftwareContext::new(PhysicalSize::new(8, 8));
        let mut pair = SlotPair::create(&mut ctx).unwrap();
        let probe = DestructionProbe::new();

        let first = sample_image(&ctx, &probe);
        pair.accept(&mut ctx, first).unwrap();
        ctx.draw(pair.front()).unwrap();
        pair.release_retired();
        let second = sample_image(&ctx, &probe);
        pair.accept(&mut ctx, second).unwrap();
        ctx.draw(pair.front()).unwrap();
        pair.release_retired();
        assert_eq!(probe.destroyed(), 0);

        // The third accept supersedes the first frame, still bound in back.
        let third = sample_image(&ctx, &probe);
        pair.accept(&mut ctx, third).unwrap();
        ctx.draw(pair.front()).unwrap();
        assert_eq!(probe.destroyed(), 0);
        pair.release_retired();
        assert_eq!(probe.destroyed(), 1);

        drop(pair);
        assert_eq!(probe.destroyed(), 3);
    }
}
