pub mod geometry;
pub mod inference;
pub mod mask;
pub mod onnx;
pub mod region;
pub mod scale;
