use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use lmrl_candle_lm::distributions::CategoricalDistribution;
use lmrl_core::{
    distributions::Distribution,
    policies::LanguagePolicy,
    rollout::RolloutRecord,
    tensors::Logp,
    tokenizer::Tokenizer,
};
use rand::{SeedableRng, rngs::StdRng};

pub const DEFAULT_MAX_NEW_TOKENS: usize = 20;

/// Output of one generate call.
#[derive(Debug)]
pub struct Generation {
    pub text: String,
    pub record: RolloutRecord,
}

/// Samples continuations token by token while keeping the log-probability of every sampled token
/// attached to the computation graph.
pub struct AutoregressiveSampler {
    pub max_new_tokens: usize,
    rng: StdRng,
}

impl Default for AutoregressiveSampler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NEW_TOKENS, None)
    }
}

impl AutoregressiveSampler {
    pub fn new(max_new_tokens: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            max_new_tokens,
            rng,
        }
    }

    fn prompt_ids(tokenizer: &impl Tokenizer, prompt: &str) -> Result<Vec<u32>> {
        let mut token_ids = tokenizer.encode(prompt)?;
        if token_ids.is_empty() {
            tracing::debug!("empty prompt, starting from the start token");
            let bos = tokenizer
                .bos_token()
                .context("prompt encodes to no tokens and the tokenizer has no start token")?;
            token_ids.push(bos);
        }
        Ok(token_ids)
    }

    pub fn generate(
        &mut self,
        policy: &impl LanguagePolicy,
        tokenizer: &impl Tokenizer,
        prompt: &str,
    ) -> Result<Generation> {
        let mut token_ids = Self::prompt_ids(tokenizer, prompt)?;
        let prompt_len = token_ids.len();
        let mut step_log_probs = Vec::with_capacity(self.max_new_tokens);
        for _ in 0..self.max_new_tokens {
            let logits = policy.next_token_logits(&token_ids)?;
            let distribution = CategoricalDistribution::from_logits(&logits)?;
            let (token, log_prob) = distribution.sample_and_score(&mut self.rng)?;
            step_log_probs.push(log_prob);
            token_ids.push(token);
        }
        let log_prob = sum_log_probs(&step_log_probs, policy)?;
        let generated_ids = token_ids.split_off(prompt_len);
        let text = tokenizer.decode(&generated_ids)?;
        Ok(Generation {
            text,
            record: RolloutRecord {
                log_prob,
                prompt_ids: token_ids,
                generated_ids,
            },
        })
    }
}

fn sum_log_probs(step_log_probs: &[Tensor], policy: &impl LanguagePolicy) -> Result<Logp> {
    let total = if step_log_probs.is_empty() {
        Tensor::zeros((), DType::F32, policy.device())?
    } else {
        Tensor::stack(step_log_probs, 0)?.sum_all()?
    };
    Ok(Logp(total))
}

/// Log-probability the policy assigns to `generated_ids` following `prompt_ids`, scored token by
/// token exactly like the sampling loop does.
pub fn sequence_log_prob(
    policy: &impl LanguagePolicy,
    prompt_ids: &[u32],
    generated_ids: &[u32],
) -> Result<Logp> {
    let mut token_ids = prompt_ids.to_vec();
    let mut step_log_probs = Vec::with_capacity(generated_ids.len());
    for &token in generated_ids {
        let logits = policy.next_token_logits(&token_ids)?;
        let distribution = CategoricalDistribution::from_logits(&logits)?;
        step_log_probs.push(distribution.log_prob(token)?);
        token_ids.push(token);
    }
    sum_log_probs(&step_log_probs, policy)
}
