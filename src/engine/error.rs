//! ### English
//! Error taxonomy for the streaming pipeline.
//!
//! Allocation, map/export, import, bind, and device-context failures are kept
//! as separate types because their fatality differs: map/export misuse is a
//! programming error, import failures are fatal only before the first accepted
//! frame, and device-context loss always tears the pipeline down.
//!
//! ### 中文
//! 流水线的错误分类。
//!
//! 分配、映射/导出、导入、绑定与设备上下文失败被拆分为独立类型，
//! 因为它们的致命程度不同：映射/导出误用属于编程错误，导入失败仅在
//! 首帧被接受之前是致命的，而设备上下文丢失总是会拆除整个流水线。

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::layout::PixelFormat;

/// ### English
/// Failure to create a hardware-visible pixel allocation.
///
/// ### 中文
/// 创建硬件可见像素分配失败。
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("invalid allocation dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("allocation device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("allocation pool exhausted")]
    Exhausted,
    #[error("backing store creation failed: {0}")]
    Backing(String),
}

/// ### English
/// Misuse of the map phase of the allocation state machine.
///
/// ### 中文
/// 分配状态机映射阶段的误用。
#[derive(Debug, Error)]
pub enum MapError {
    #[error("allocation is already mapped for writing")]
    AlreadyMapped,
    #[error("allocation was already exported; a fresh allocation is required")]
    AlreadyExported,
    #[error("CPU mapping failed: {0}")]
    Backing(String),
}

/// ### English
/// Misuse of the export phase of the allocation state machine.
///
/// ### 中文
/// 分配状态机导出阶段的误用。
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("allocation was already exported and not reclaimed")]
    AlreadyExported,
    #[error("descriptor export failed: {0}")]
    Backing(String),
}

/// ### English
/// The driver or device rejected an export descriptor during import.
///
/// ### 中文
/// 导入时驱动或设备拒绝了导出描述符。
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("pixel format {0:?} is not importable on this backend")]
    UnsupportedFormat(PixelFormat),
    #[error("no graphics context is available for import")]
    ContextMissing,
    #[error("descriptor layout is inconsistent: {0}")]
    BadDescriptor(String),
    #[error("driver rejected the descriptor: {0}")]
    Rejected(String),
}

/// ### English
/// An image was destroyed before it could be bound (lifetime bug).
///
/// ### 中文
/// 图像在绑定前已被销毁（生命周期 bug）。
#[derive(Debug, Error)]
pub enum BindError {
    #[error("image backing was destroyed before bind")]
    ImageDestroyed,
}

/// ### English
/// Graphics device context creation or loss. Always fatal.
///
/// ### 中文
/// 图形设备上下文创建失败或丢失。总是致命。
#[derive(Debug, Error)]
pub enum DeviceContextError {
    #[error("device context unavailable: {0}")]
    Unavailable(String),
    #[error("device context lost: {0}")]
    Lost(String),
    #[error("present failed: {0}")]
    Present(String),
}

/// ### English
/// Source file could not be read.
///
/// ### 中文
/// 无法读取源文件。
#[derive(Debug, Error)]
#[error("failed to read {path}: {source}")]
pub struct FileError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// ### English
/// Top-level pipeline failure reported to the caller of `Pipeline::run`.
///
/// ### 中文
/// `Pipeline::run` 调用方收到的顶层流水线失败。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Device(#[from] DeviceContextError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error("pipeline is not in the Ready state")]
    NotReady,
    #[error("no frame was produced within the startup window of {0:?}")]
    NoFirstFrame(Duration),
    #[error("producer configuration invalid: {0}")]
    Config(String),
}
