pub mod distributions;
pub mod policies;
pub mod rollout;
pub mod tensors;
pub mod tokenizer;

pub use candle_core;
