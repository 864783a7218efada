//! ### English
//! Engine internal modules (allocation, import, mailbox, slots, and the
//! pipeline orchestrator).
//!
//! ### 中文
//! 引擎内部模块（分配、导入、邮箱、槽位与流水线编排器）。

pub mod alloc;
pub mod error;
pub mod gpu;
pub mod image;
pub mod layout;
pub mod mailbox;
pub mod pipeline;
pub mod producer;
pub mod slots;
pub mod source;
