pub mod reinforce;
pub mod sampler;
