use crate::session::Session;
use anyhow::Result;
use candle_core::Device;
use candle_nn::ParamsAdamW;
use lmrl_agents::{
    reinforce::Reinforce,
    sampler::{AutoregressiveSampler, DEFAULT_MAX_NEW_TOKENS},
};
use lmrl_candle_lm::{
    config::CausalLmConfig,
    learning_module::PolicyLM,
    model::CausalLm,
    optimizer::OptimizerWithMaxGrad,
    tokenizer::{HfTokenizer, TokenizerKind},
};
use lmrl_core::tokenizer::{ByteTokenizer, Tokenizer};
use std::path::PathBuf;

pub type CandleSession = Session<CausalLm, TokenizerKind, PolicyLM>;

#[derive(Debug, Clone)]
pub enum TokenizerSource {
    Bytes,
    File(PathBuf),
}

impl TokenizerSource {
    pub fn build(&self) -> Result<TokenizerKind> {
        match self {
            Self::Bytes => Ok(TokenizerKind::Bytes(ByteTokenizer)),
            Self::File(path) => Ok(TokenizerKind::Hf(Box::new(HfTokenizer::from_file(path)?))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModelSource {
    Tiny,
    Gpt2,
    ConfigFile(PathBuf),
    Config(CausalLmConfig),
}

impl ModelSource {
    /// The model's vocabulary always follows the tokenizer.
    pub fn config(&self, vocab_size: usize) -> Result<CausalLmConfig> {
        let config = match self {
            Self::Tiny => CausalLmConfig::tiny(vocab_size),
            Self::Gpt2 => CausalLmConfig::gpt2(),
            Self::ConfigFile(path) => CausalLmConfig::from_json_file(path)?,
            Self::Config(config) => config.clone(),
        };
        if config.vocab_size != vocab_size {
            tracing::warn!(
                configured = config.vocab_size,
                tokenizer = vocab_size,
                "vocabulary size taken from the tokenizer"
            );
        }
        Ok(config.with_vocab_size(vocab_size))
    }
}

pub struct SessionBuilder {
    pub model: ModelSource,
    pub tokenizer: TokenizerSource,
    pub max_new_tokens: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub max_grad_norm: Option<f32>,
    pub seed: Option<u64>,
    pub device: Device,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            model: ModelSource::Tiny,
            tokenizer: TokenizerSource::Bytes,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            learning_rate: 1e-4,
            weight_decay: 0.01,
            max_grad_norm: None,
            seed: None,
            device: Device::Cpu,
        }
    }
}

impl SessionBuilder {
    pub fn set_model(&mut self, model: ModelSource) {
        self.model = model;
    }

    pub fn set_tokenizer(&mut self, tokenizer: TokenizerSource) {
        self.tokenizer = tokenizer;
    }

    pub fn set_max_new_tokens(&mut self, max_new_tokens: usize) {
        self.max_new_tokens = max_new_tokens;
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    pub fn build(&self) -> Result<CandleSession> {
        let tokenizer = self.tokenizer.build()?;
        let config = self.model.config(tokenizer.vocab_size())?;
        let (policy, varmap) = CausalLm::from_config(&config, &self.device)?;
        tracing::info!(
            parameters = CausalLm::num_parameters(&varmap),
            layers = config.num_layers,
            hidden_size = config.hidden_size,
            vocab_size = config.vocab_size,
            "initialised blank-slate model"
        );
        let optimizer_params = ParamsAdamW {
            lr: self.learning_rate,
            weight_decay: self.weight_decay,
            ..Default::default()
        };
        let optimizer = OptimizerWithMaxGrad::adamw(varmap, optimizer_params, self.max_grad_norm)?;
        let reinforce = Reinforce::new(PolicyLM::new(optimizer));
        let sampler = AutoregressiveSampler::new(self.max_new_tokens, self.seed);
        Ok(Session::new(policy, tokenizer, sampler, reinforce))
    }
}
