//! ### English
//! Single-slot frame mailbox between producer threads and the render loop.
//!
//! Latency over completeness: a deposit unconditionally replaces any
//! undelivered frame (destroying it), the producer never blocks on the
//! consumer, and `try_take` never blocks the consumer. Frame drops under slow
//! consumption are policy, not a bug. The bounded `wait_until_ready` exists so
//! startup can wait for the first frame without busy-polling.
//!
//! ### 中文
//! 生产者线程与渲染循环之间的单槽位帧邮箱。
//!
//! 延迟优先于完整性：deposit 无条件替换（并销毁）任何未投递的帧，
//! 生产者从不阻塞在消费者上，`try_take` 也从不阻塞消费者。消费过慢时的
//! 掉帧是策略而非 bug。有界的 `wait_until_ready` 用于启动时等待首帧，
//! 避免忙等轮询。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::engine::image::ImportedImage;

/// ### English
/// At-most-one-pending handoff of the latest ready image.
///
/// ### 中文
/// “最多一个待取”的最新就绪图像交接点。
#[derive(Default)]
pub struct FrameMailbox {
    pending: Mutex<Option<ImportedImage>>,
    ready: Condvar,
    deposited: AtomicU64,
    dropped: AtomicU64,
}

impl FrameMailbox {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Producer side: stores `image` as the latest ready frame, destroying any
    /// undelivered predecessor. Never blocks beyond the brief slot lock.
    ///
    /// ### 中文
    /// 生产者侧：将 `image` 存为最新就绪帧，并销毁任何未投递的前一帧。
    /// 除短暂的槽位锁外从不阻塞。
    pub fn deposit(&self, image: ImportedImage) {
        let superseded = {
            let mut slot = self.pending.lock();
            slot.replace(image)
        };
        self.deposited.fetch_add(1, Ordering::Relaxed);
        if superseded.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        // Destroy outside the lock; image teardown may touch the GPU driver.
        drop(superseded);
        self.ready.notify_one();
    }

    /// ### English
    /// Consumer side: takes the pending image if one arrived since the last
    /// take. Non-blocking; an empty mailbox is left unchanged.
    ///
    /// ### 中文
    /// 消费者侧：若上次取走后有新帧到达则取走它。非阻塞；邮箱为空时
    /// 状态不变。
    pub fn try_take(&self) -> Option<ImportedImage> {
        self.pending.lock().take()
    }

    /// ### English
    /// Bounded wait for a pending frame. Returns `true` as soon as one is
    /// ready, `false` once `timeout` elapses with the mailbox still empty.
    /// Does not take the frame.
    ///
    /// ### 中文
    /// 有界等待待取帧。一旦有帧就绪返回 `true`；`timeout` 耗尽而邮箱仍空
    /// 则返回 `false`。不会取走帧。
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.pending.lock();
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.ready.wait_for(&mut slot, deadline - now);
        }
        true
    }

    /// ### English
    /// Total frames deposited since creation.
    ///
    /// ### 中文
    /// 自创建以来投递的总帧数。
    #[inline]
    pub fn deposited(&self) -> u64 {
        self.deposited.load(Ordering::Relaxed)
    }

    /// ### English
    /// Frames overwritten before the consumer took them.
    ///
    /// ### 中文
    /// 在消费者取走之前被覆盖的帧数。
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use dpi::PhysicalSize;

    use super::*;
    use crate::engine::image::DestructionProbe;
    use crate::engine::layout::{ImageLayout, PixelFormat};

    fn tagged_image(tag: u32, probe: &DestructionProbe) -> ImportedImage {
        let mut image = ImportedImage::detached(ImageLayout {
            size: PhysicalSize::new(tag, 1),
            format: PixelFormat::Rgba8888,
            pitch: tag * 4,
        });
        image.set_probe(probe.clone());
        image
    }

    #[test]
    fn try_take_on_empty_mailbox_returns_none_and_stays_empty() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.try_take().is_none());
        assert!(mailbox.try_take().is_none());
        assert_eq!(mailbox.deposited(), 0);
    }

    #[test]
    fn rapid_deposits_keep_only_the_last_frame() {
        let mailbox = FrameMailbox::new();
        let probe = DestructionProbe::new();
        for tag in 1..=5 {
            mailbox.deposit(tagged_image(tag, &probe));
        }

        let taken = mailbox.try_take().expect("one frame must be pending");
        assert_eq!(taken.layout().size.width, 5);
        // The four intermediate frames were destroyed, not leaked.
        assert_eq!(probe.destroyed(), 4);
        assert_eq!(mailbox.dropped(), 4);
        assert!(mailbox.try_take().is_none());
    }

    #[test]
    fn wait_until_ready_times_out_on_empty_mailbox() {
        let mailbox = FrameMailbox::new();
        assert!(!mailbox.wait_until_ready(Duration::from_millis(20)));
    }

    #[test]
    fn wait_until_ready_wakes_on_deposit() {
        let mailbox = Arc::new(FrameMailbox::new());
        let producer_mailbox = mailbox.clone();
        let probe = DestructionProbe::new();
        let image = tagged_image(7, &probe);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer_mailbox.deposit(image);
        });

        assert!(mailbox.wait_until_ready(Duration::from_secs(5)));
        assert_eq!(mailbox.try_take().unwrap().layout().size.width, 7);
        producer.join().unwrap();
    }
}
