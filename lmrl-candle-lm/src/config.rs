use anyhow::{Result, ensure};
use serde::Deserialize;
use std::path::Path;

/// Shape of the causal transformer. Field aliases accept the keys of a GPT-2 `config.json`, so
/// the HuggingFace file can be used as is.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CausalLmConfig {
    pub vocab_size: usize,
    #[serde(alias = "n_embd")]
    pub hidden_size: usize,
    #[serde(alias = "n_layer")]
    pub num_layers: usize,
    #[serde(alias = "n_head")]
    pub num_heads: usize,
    #[serde(alias = "n_positions")]
    pub context_length: usize,
    #[serde(default = "default_layer_norm_eps", alias = "layer_norm_epsilon")]
    pub layer_norm_eps: f64,
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

impl Default for CausalLmConfig {
    fn default() -> Self {
        Self::tiny(257)
    }
}

impl CausalLmConfig {
    /// Small enough to train on a CPU between two requests.
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            hidden_size: 64,
            num_layers: 2,
            num_heads: 4,
            context_length: 256,
            layer_norm_eps: default_layer_norm_eps(),
        }
    }

    /// The 124M parameter GPT-2 shape.
    pub fn gpt2() -> Self {
        Self {
            vocab_size: 50257,
            hidden_size: 768,
            num_layers: 12,
            num_heads: 12,
            context_length: 1024,
            layer_norm_eps: default_layer_norm_eps(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.vocab_size > 0, "vocab_size must be positive");
        ensure!(self.num_heads > 0, "num_heads must be positive");
        ensure!(
            self.hidden_size > 0 && self.hidden_size % self.num_heads == 0,
            "hidden_size ({}) must be a positive multiple of num_heads ({})",
            self.hidden_size,
            self.num_heads
        );
        ensure!(self.context_length > 0, "context_length must be positive");
        Ok(())
    }
}
