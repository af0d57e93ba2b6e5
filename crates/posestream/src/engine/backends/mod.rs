//! Model loaders
//!
//! - [`synthetic`]: deterministic standing skeleton, no model file needed
//! - `onnx` (feature `onnx`): BlazePose-style landmark model on ONNX Runtime

pub mod synthetic;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use synthetic::SyntheticLoader;

#[cfg(feature = "onnx")]
pub use onnx::OnnxLoader;
