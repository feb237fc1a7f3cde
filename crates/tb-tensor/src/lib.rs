//! `tb-tensor` - Tensor primitives and pluggable compute backends for the
//! TTS backbone.
//!
//! This crate provides:
//! - A `Tensor` type backed by CPU storage
//! - A `ComputeBackend` trait for pluggable compute (CPU, Metal, etc.)
//! - A reference `CpuBackend` implementation, including the fused
//!   scaled-dot-product-attention primitive
//! - Shape utilities and data type definitions (F32, F16, BF16)

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
