pub mod config;
pub mod distributions;
pub mod layers;
pub mod learning_module;
pub mod model;
pub mod optimizer;
pub mod tokenizer;
