//! ### English
//! `dmatex_engine` crate root.
//! Zero-copy external-buffer texture streaming: producer threads fill
//! hardware-visible allocations, export them as dma-buf style descriptors, and
//! the render loop samples them as GPU textures without copying pixels.
//! Core implementation lives under `engine`.
//!
//! ### 中文
//! `dmatex_engine` 的 crate 根。
//! 零拷贝外部缓冲纹理流水线：生产者线程填充硬件可见的分配，将其导出为
//! dma-buf 风格的描述符，渲染循环无需拷贝像素即可把它们作为 GPU 纹理采样。
//! 核心实现位于 `engine` 模块。

pub mod engine;

pub use engine::alloc::{ExternalAllocation, FrameAllocator, MappedRegion, MemfdAllocator};
pub use engine::error::{
    AllocationError, BindError, DeviceContextError, ExportError, FileError, ImportError, MapError,
    PipelineError,
};
pub use engine::gpu::{BackendKind, DescriptorImporter, GpuContext};
pub use engine::image::{DestructionProbe, ExportDescriptor, ImportedImage};
pub use engine::layout::{FrameRequest, ImageLayout, PixelFormat};
pub use engine::mailbox::FrameMailbox;
pub use engine::pipeline::{
    Pipeline, PipelineCommand, PipelineConfig, PipelineState, PipelineStats, RunSummary,
};
pub use engine::producer::ProducerKind;
pub use engine::slots::{SlotPair, TextureSlot};
