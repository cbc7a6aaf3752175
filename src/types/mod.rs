//! 类型系统模块：定义请求、补全结果和模型参数等核心数据类型。
//!
//! # Types Module
//!
//! Core value types shared by the fingerprinter, the dedup cache, the provider
//! client and the orchestrator.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Chat message with role and text content |
//! | [`MessageRole`] | Message role (system, user, assistant) |
//! | [`Completion`] | Immutable provider answer plus usage and latency |
//! | [`Usage`] | Token accounting reported by the provider |
//! | [`ModelParams`] | Sampling parameters that take part in the cache key |
//!
//! ## Example
//!
//! ```rust
//! use assistant_core::types::{Message, ModelParams};
//!
//! let system = Message::system("You are a helpful assistant");
//! let user = Message::user("What's the weather?");
//! let params = ModelParams::new().with_model("gpt-4o-mini").with_temperature(0.2);
//! assert_eq!(params.model.as_deref(), Some("gpt-4o-mini"));
//! ```

pub mod completion;
pub mod message;
pub mod params;

pub use completion::{Completion, Usage};
pub use message::{Message, MessageRole};
pub use params::ModelParams;
