//! ### English
//! Pipeline orchestrator: owns the backend, the producer thread, the mailbox,
//! and the slot pair, and drives the render loop.
//!
//! Lifecycle is `Uninitialized → Ready → Running → ShuttingDown → Stopped`.
//! The first frame is special: if nothing reaches the mailbox within the
//! startup window the run fails, because a pipeline that never shows anything
//! is misconfigured. After that, producer-side failures only cost frames.
//!
//! ### 中文
//! 流水线编排器：持有后端、生产者线程、邮箱与槽位对，并驱动渲染循环。
//!
//! 生命周期为 `Uninitialized → Ready → Running → ShuttingDown → Stopped`。
//! 首帧是特殊的：若启动窗口内没有任何帧到达邮箱，则本次运行失败，
//! 因为一个永远什么都不显示的流水线属于配置错误。此后生产者侧的失败
//! 只损失帧。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use dpi::PhysicalSize;

use crate::engine::alloc::FrameAllocator;
use crate::engine::error::PipelineError;
use crate::engine::gpu::{self, BackendKind, GpuContext};
use crate::engine::layout::PixelFormat;
use crate::engine::mailbox::FrameMailbox;
use crate::engine::producer::{self, Content, DecodedImage, ProducerKind};
use crate::engine::slots::SlotPair;
use crate::engine::source;

/// ### English
/// Everything decided before the pipeline starts.
///
/// ### 中文
/// 流水线启动前确定的全部配置。
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub size: PhysicalSize<u32>,
    pub format: PixelFormat,
    pub backend: BackendKind,
    pub producer: ProducerKind,
    /// Source files for the decode producer; index 0 is the startup source.
    pub sources: Vec<PathBuf>,
    /// Stop after this many drawn frames; `None` runs until a stop command.
    pub frames: Option<u64>,
    pub fps: u32,
    pub startup_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            size: PhysicalSize::new(640, 480),
            format: PixelFormat::Rgba8888,
            backend: BackendKind::Auto,
            producer: ProducerKind::Pattern,
            sources: Vec::new(),
            frames: None,
            fps: 60,
            startup_timeout: Duration::from_secs(2),
        }
    }
}

/// ### English
/// Lifecycle state, observable between calls.
///
/// ### 中文
/// 生命周期状态，可在调用之间观察。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready,
    Running,
    ShuttingDown,
    Stopped,
}

/// ### English
/// Runtime commands accepted while the render loop is running.
///
/// ### 中文
/// 渲染循环运行期间接受的运行时命令。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Switch the decode producer to the secondary source.
    UseSecondary,
    Stop,
}

/// ### English
/// Shared counters, updated lock-free from both threads.
///
/// ### 中文
/// 共享计数器，由两个线程无锁更新。
#[derive(Debug, Default)]
pub struct PipelineStats {
    produced: AtomicU64,
    drawn: AtomicU64,
    imports_failed: AtomicU64,
    allocation_failures: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drawn(&self) {
        self.drawn.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_import_failure(&self) {
        self.imports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_drawn(&self) -> u64 {
        self.drawn.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn imports_failed(&self) -> u64 {
        self.imports_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn allocation_failures(&self) -> u64 {
        self.allocation_failures.load(Ordering::Relaxed)
    }
}

/// ### English
/// End-of-run report.
///
/// ### 中文
/// 运行结束报告。
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    pub frames_drawn: u64,
    pub frames_produced: u64,
    pub frames_dropped: u64,
    pub imports_failed: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    /// ### English
    /// Achieved display rate over the whole run.
    ///
    /// ### 中文
    /// 整个运行期间达到的显示帧率。
    pub fn fps(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.frames_drawn as f64 / self.elapsed.as_secs_f64()
    }
}

/// ### English
/// The streaming pipeline. `init` builds the backend and decodes sources;
/// `run` blocks on the render loop until the frame budget or a stop command.
///
/// ### 中文
/// 流式流水线。`init` 构建后端并解码源；`run` 阻塞在渲染循环上，
/// 直到帧数预算耗尽或收到停止命令。
pub struct Pipeline {
    config: PipelineConfig,
    state: PipelineState,
    ctx: Option<Box<dyn GpuContext>>,
    allocator: Option<Box<dyn FrameAllocator>>,
    content: Option<Content>,
    active_source: Arc<AtomicUsize>,
    mailbox: Arc<FrameMailbox>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: PipelineState::Uninitialized,
            ctx: None,
            allocator: None,
            content: None,
            active_source: Arc::new(AtomicUsize::new(0)),
            mailbox: Arc::new(FrameMailbox::new()),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// ### English
    /// Creates the backend and prepares the frame content. Decode sources are
    /// read and decoded once, up front, so a bad file fails here instead of in
    /// the middle of the run.
    ///
    /// ### 中文
    /// 创建后端并准备帧内容。解码源在此一次性读取并解码，因此坏文件会
    /// 在这里失败，而不是在运行中途。
    pub fn init(&mut self) -> Result<(), PipelineError> {
        let content = match self.config.producer {
            ProducerKind::Pattern => Content::Pattern {
                size: self.config.size,
                format: self.config.format,
            },
            ProducerKind::Decode => {
                if self.config.sources.is_empty() {
                    return Err(PipelineError::Config(
                        "the decode producer needs at least one source file".to_string(),
                    ));
                }
                let mut frames = Vec::with_capacity(self.config.sources.len());
                for path in &self.config.sources {
                    let bytes = source::read_all(path)?;
                    let decoded = DecodedImage::decode(&bytes)?;
                    tracing::info!(
                        path = %path.display(),
                        width = decoded.size.width,
                        height = decoded.size.height,
                        "decoded source"
                    );
                    frames.push(decoded);
                }
                Content::Decode {
                    frames,
                    active: self.active_source.clone(),
                    format: self.config.format,
                }
            }
        };

        let (ctx, allocator) = gpu::create_backend(self.config.backend, self.config.size)?;
        self.ctx = Some(ctx);
        self.allocator = Some(allocator);
        self.content = Some(content);
        self.state = PipelineState::Ready;
        Ok(())
    }

    /// ### English
    /// Runs the render loop. The producer thread is always stopped and joined
    /// before this returns, on success and on error alike.
    ///
    /// ### 中文
    /// 运行渲染循环。无论成功还是失败，返回前生产者线程总会被停止并
    /// join。
    pub fn run(&mut self, commands: &Receiver<PipelineCommand>) -> Result<RunSummary, PipelineError> {
        if self.state != PipelineState::Ready {
            return Err(PipelineError::NotReady);
        }
        let mut ctx = self.ctx.take().ok_or(PipelineError::NotReady)?;
        let allocator = self.allocator.take().ok_or(PipelineError::NotReady)?;
        let content = self.content.take().ok_or(PipelineError::NotReady)?;

        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);
        let producer = producer::spawn(
            allocator,
            ctx.importer(),
            self.mailbox.clone(),
            stop.clone(),
            self.stats.clone(),
            content,
            interval,
        )
        .map_err(|err| PipelineError::Config(format!("could not spawn the producer: {err}")))?;

        self.state = PipelineState::Running;
        let started = Instant::now();
        let result = self.render_loop(&mut *ctx, commands, interval);

        self.state = PipelineState::ShuttingDown;
        stop.store(true, Ordering::Relaxed);
        if producer.join().is_err() {
            tracing::error!("producer thread panicked");
        }
        // Destroy any frame still in flight.
        drop(self.mailbox.try_take());
        self.state = PipelineState::Stopped;

        result.map(|()| RunSummary {
            frames_drawn: self.stats.frames_drawn(),
            frames_produced: self.stats.produced(),
            frames_dropped: self.mailbox.dropped(),
            imports_failed: self.stats.imports_failed(),
            elapsed: started.elapsed(),
        })
    }

    fn render_loop(
        &mut self,
        ctx: &mut dyn GpuContext,
        commands: &Receiver<PipelineCommand>,
        interval: Duration,
    ) -> Result<(), PipelineError> {
        // First frame: a pipeline that never produces anything must not sit
        // on a dark screen forever.
        if !self.mailbox.wait_until_ready(self.config.startup_timeout) {
            return Err(PipelineError::NoFirstFrame(self.config.startup_timeout));
        }

        let mut pair = SlotPair::create(ctx)?;
        loop {
            let tick_started = Instant::now();

            let mut stopping = false;
            while let Ok(command) = commands.try_recv() {
                match command {
                    PipelineCommand::Stop => stopping = true,
                    PipelineCommand::UseSecondary => {
                        tracing::info!("switching to the secondary source");
                        self.active_source.store(1, Ordering::Relaxed);
                    }
                }
            }
            if stopping {
                return Ok(());
            }

            if let Some(image) = self.mailbox.try_take() {
                // A destroyed image reaching the bind is a lifetime bug, not
                // a per-frame hiccup; it tears the pipeline down.
                pair.accept(ctx, image)?;
            }

            if pair.has_frame() {
                ctx.draw(pair.front())?;
                ctx.present()?;
                // The draw after the swap is done; the superseded image can go.
                pair.release_retired();
                self.stats.record_drawn();
            }

            if let Some(limit) = self.config.frames {
                if self.stats.frames_drawn() >= limit {
                    return Ok(());
                }
            }

            let elapsed = tick_started.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::error::{BindError, DeviceContextError, ImportError};
    use crate::engine::gpu::DescriptorImporter;
    use crate::engine::gpu::software::{SoftwareContext, SoftwareImporter};
    use crate::engine::image::{ExportDescriptor, ImportedImage};
    use crate::engine::layout::ImageLayout;
    use crate::engine::slots::TextureSlot;

    fn software_config(frames: u64) -> PipelineConfig {
        PipelineConfig {
            size: PhysicalSize::new(32, 32),
            backend: BackendKind::Software,
            frames: Some(frames),
            fps: 240,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn run_before_init_is_rejected() {
        let mut pipeline = Pipeline::new(software_config(1));
        let (_tx, rx) = crossbeam_channel::unbounded();
        assert!(matches!(pipeline.run(&rx), Err(PipelineError::NotReady)));
    }

    #[test]
    fn decode_without_sources_is_a_config_error() {
        let mut pipeline = Pipeline::new(PipelineConfig {
            producer: ProducerKind::Decode,
            ..software_config(1)
        });
        assert!(matches!(pipeline.init(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn pattern_run_draws_the_requested_frame_count() {
        let mut pipeline = Pipeline::new(software_config(5));
        pipeline.init().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);

        let (_tx, rx) = crossbeam_channel::unbounded();
        let summary = pipeline.run(&rx).unwrap();
        assert_eq!(summary.frames_drawn, 5);
        assert!(summary.frames_produced >= 1);
        assert_eq!(summary.imports_failed, 0);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn stop_command_ends_an_unbounded_run() {
        let mut pipeline = Pipeline::new(PipelineConfig {
            frames: None,
            ..software_config(0)
        });
        pipeline.init().unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(PipelineCommand::Stop).unwrap();
        let summary = pipeline.run(&rx).unwrap();
        assert_eq!(summary.frames_drawn, 0);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    /// Delegates to a real software context but hands producers an importer
    /// with no context behind it, so no frame can ever reach the mailbox.
    struct ImportlessContext(SoftwareContext);

    impl GpuContext for ImportlessContext {
        fn importer(&self) -> Arc<dyn DescriptorImporter> {
            Arc::new(SoftwareImporter::detached())
        }

        fn create_slot(&mut self) -> Result<TextureSlot, DeviceContextError> {
            self.0.create_slot()
        }

        fn bind_slot(
            &mut self,
            slot: &mut TextureSlot,
            image: ImportedImage,
        ) -> Result<Option<ImportedImage>, BindError> {
            self.0.bind_slot(slot, image)
        }

        fn draw(&mut self, slot: &TextureSlot) -> Result<(), DeviceContextError> {
            self.0.draw(slot)
        }

        fn present(&mut self) -> Result<(), DeviceContextError> {
            self.0.present()
        }

        fn read_back(&mut self) -> Option<Vec<u8>> {
            self.0.read_back()
        }
    }

    #[test]
    fn a_run_with_no_first_frame_fails_within_the_startup_window() {
        let mut pipeline = Pipeline::new(PipelineConfig {
            startup_timeout: Duration::from_millis(50),
            ..software_config(3)
        });
        pipeline.init().unwrap();
        // Every import will fail, so the mailbox stays empty.
        pipeline.ctx = Some(Box::new(ImportlessContext(SoftwareContext::new(
            PhysicalSize::new(32, 32),
        ))));

        let (_tx, rx) = crossbeam_channel::unbounded();
        match pipeline.run(&rx) {
            Err(PipelineError::NoFirstFrame(window)) => {
                assert_eq!(window, Duration::from_millis(50));
            }
            other => panic!("expected NoFirstFrame, got {other:?}"),
        }
        // The producer was stopped and joined; its failures were counted.
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.stats().imports_failed() >= 1);
    }

    #[test]
    fn a_destroyed_image_reaching_the_bind_is_fatal() {
        let mut pipeline = Pipeline::new(software_config(3));
        pipeline.init().unwrap();
        // A producer that can never import keeps the mailbox empty, so the
        // only frame the loop ever takes is the dead one planted here.
        pipeline.ctx = Some(Box::new(ImportlessContext(SoftwareContext::new(
            PhysicalSize::new(32, 32),
        ))));
        pipeline.mailbox.deposit(ImportedImage::detached(ImageLayout {
            size: PhysicalSize::new(32, 32),
            format: PixelFormat::Rgba8888,
            pitch: 128,
        }));

        let (_tx, rx) = crossbeam_channel::unbounded();
        match pipeline.run(&rx) {
            Err(PipelineError::Bind(BindError::ImageDestroyed)) => {}
            other => panic!("expected a fatal bind error, got {other:?}"),
        }
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    /// Imports succeed a fixed number of times, then the driver says no.
    struct FailAfter {
        inner: Arc<dyn DescriptorImporter>,
        successes_left: AtomicU64,
    }

    impl DescriptorImporter for FailAfter {
        fn import(&self, descriptor: ExportDescriptor) -> Result<ImportedImage, ImportError> {
            if self.successes_left.load(Ordering::Relaxed) == 0 {
                return Err(ImportError::Rejected("driver refused the descriptor".to_string()));
            }
            self.successes_left.fetch_sub(1, Ordering::Relaxed);
            self.inner.import(descriptor)
        }
    }

    struct FlakyContext {
        ctx: SoftwareContext,
        importer: Arc<FailAfter>,
    }

    impl GpuContext for FlakyContext {
        fn importer(&self) -> Arc<dyn DescriptorImporter> {
            self.importer.clone()
        }

        fn create_slot(&mut self) -> Result<TextureSlot, DeviceContextError> {
            self.ctx.create_slot()
        }

        fn bind_slot(
            &mut self,
            slot: &mut TextureSlot,
            image: ImportedImage,
        ) -> Result<Option<ImportedImage>, BindError> {
            self.ctx.bind_slot(slot, image)
        }

        fn draw(&mut self, slot: &TextureSlot) -> Result<(), DeviceContextError> {
            self.ctx.draw(slot)
        }

        fn present(&mut self) -> Result<(), DeviceContextError> {
            self.ctx.present()
        }

        fn read_back(&mut self) -> Option<Vec<u8>> {
            self.ctx.read_back()
        }
    }

    #[test]
    fn steady_state_import_failures_keep_showing_the_last_good_frame() {
        let mut pipeline = Pipeline::new(software_config(10));
        pipeline.init().unwrap();
        let ctx = SoftwareContext::new(PhysicalSize::new(32, 32));
        let importer = Arc::new(FailAfter {
            inner: ctx.importer(),
            successes_left: AtomicU64::new(2),
        });
        pipeline.ctx = Some(Box::new(FlakyContext { ctx, importer }));

        let (_tx, rx) = crossbeam_channel::unbounded();
        let summary = pipeline.run(&rx).unwrap();
        // The budget is met by redrawing the retained front image: at most
        // two frames ever reached the mailbox.
        assert_eq!(summary.frames_drawn, 10);
        assert!(summary.frames_produced <= 2);
        assert!(summary.imports_failed >= 1);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn secondary_switch_reaches_the_producer() {
        let mut pipeline = Pipeline::new(PipelineConfig {
            frames: Some(20),
            ..software_config(0)
        });
        pipeline.init().unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(PipelineCommand::UseSecondary).unwrap();
        pipeline.run(&rx).unwrap();
        assert_eq!(pipeline.active_source.load(Ordering::Relaxed), 1);
    }
}
