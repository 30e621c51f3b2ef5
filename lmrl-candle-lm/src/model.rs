//! Blank-slate GPT-2 style causal language model: token and position embeddings, a stack of
//! pre-norm blocks, a final layer norm and an LM head tied to the token embedding.

use crate::{
    config::CausalLmConfig,
    layers::{Block, LayerNorm},
};
use anyhow::{Result, ensure};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, Init, Module, VarBuilder, VarMap};
use lmrl_core::policies::LanguagePolicy;

#[derive(Debug, Clone)]
pub struct CausalLm {
    config: CausalLmConfig,
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    device: Device,
}

impl CausalLm {
    pub fn new(config: &CausalLmConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let init = Init::Randn {
            mean: 0.0,
            stdev: 0.02,
        };
        let wte = vb.pp("wte").get_with_hints(
            (config.vocab_size, config.hidden_size),
            "weight",
            init,
        )?;
        let wpe = vb.pp("wpe").get_with_hints(
            (config.context_length, config.hidden_size),
            "weight",
            init,
        )?;
        let blocks = (0..config.num_layers)
            .map(|i| Block::new(config, vb.pp(format!("h.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let ln_f = LayerNorm::new(config.hidden_size, config.layer_norm_eps, vb.pp("ln_f"))?;
        Ok(Self {
            config: config.clone(),
            wte: Embedding::new(wte, config.hidden_size),
            wpe: Embedding::new(wpe, config.hidden_size),
            blocks,
            ln_f,
            device: vb.device().clone(),
        })
    }

    /// Creates a randomly initialised model whose parameters all live in the returned varmap.
    pub fn from_config(config: &CausalLmConfig, device: &Device) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    pub fn config(&self) -> &CausalLmConfig {
        &self.config
    }

    /// Final hidden states, token_ids: [batch, seq] -> [batch, seq, hidden]
    pub fn forward_hidden(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = token_ids.dims2()?;
        ensure!(
            seq_len <= self.config.context_length,
            "sequence of {seq_len} tokens exceeds the context length {}",
            self.config.context_length
        );
        let positions = Tensor::arange(0u32, seq_len as u32, &self.device)?;
        let mut xs = self
            .wte
            .forward(token_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;
        for block in self.blocks.iter() {
            xs = block.forward(&xs)?;
        }
        Ok(self.ln_f.forward(&xs)?)
    }

    /// Projects hidden states [n, hidden] onto the vocabulary.
    fn lm_head(&self, hidden: &Tensor) -> Result<Tensor> {
        Ok(hidden.matmul(&self.wte.embeddings().t()?)?)
    }

    /// Logits for every position, token_ids: [batch, seq] -> [batch, seq, vocab]
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let hidden = self.forward_hidden(token_ids)?;
        let (batch, seq_len, hidden_size) = hidden.dims3()?;
        let logits = self.lm_head(&hidden.reshape((batch * seq_len, hidden_size))?)?;
        Ok(logits.reshape((batch, seq_len, self.config.vocab_size))?)
    }

    pub fn num_parameters(varmap: &VarMap) -> usize {
        varmap.all_vars().iter().map(|var| var.elem_count()).sum()
    }
}

impl LanguagePolicy for CausalLm {
    fn next_token_logits(&self, token_ids: &[u32]) -> Result<Tensor> {
        ensure!(!token_ids.is_empty(), "cannot run the model on an empty sequence");
        // sliding window over the most recent tokens
        let start = token_ids.len().saturating_sub(self.config.context_length);
        let window = &token_ids[start..];
        let input = Tensor::new(window, &self.device)?.unsqueeze(0)?;
        let hidden = self.forward_hidden(&input)?;
        let last = hidden.narrow(1, window.len() - 1, 1)?.squeeze(1)?;
        Ok(self.lm_head(&last)?.squeeze(0)?)
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
