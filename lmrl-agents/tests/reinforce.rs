use anyhow::Result;
use candle_core::Device;
use candle_nn::{ParamsAdamW, VarMap};
use lmrl_agents::{
    reinforce::Reinforce,
    sampler::{AutoregressiveSampler, Generation, sequence_log_prob},
};
use lmrl_candle_lm::{
    config::CausalLmConfig, learning_module::PolicyLM, model::CausalLm,
    optimizer::OptimizerWithMaxGrad,
};
use lmrl_core::tokenizer::{ByteTokenizer, Tokenizer};

fn tiny_policy() -> Result<(CausalLm, VarMap)> {
    let config = CausalLmConfig {
        vocab_size: ByteTokenizer.vocab_size(),
        hidden_size: 8,
        num_layers: 1,
        num_heads: 2,
        context_length: 32,
        layer_norm_eps: 1e-5,
    };
    CausalLm::from_config(&config, &Device::Cpu)
}

fn reinforce(varmap: VarMap, lr: f64) -> Result<Reinforce<PolicyLM>> {
    let params = ParamsAdamW {
        lr,
        weight_decay: 0.0,
        ..Default::default()
    };
    let optimizer = OptimizerWithMaxGrad::adamw(varmap, params, None)?;
    Ok(Reinforce::new(PolicyLM::new(optimizer)))
}

fn rollout(policy: &CausalLm, seed: u64) -> Result<Generation> {
    AutoregressiveSampler::new(5, Some(seed)).generate(policy, &ByteTokenizer, "Hello")
}

fn snapshot(varmap: &VarMap) -> Result<Vec<Vec<f32>>> {
    Ok(varmap
        .all_vars()
        .iter()
        .map(|var| var.flatten_all()?.to_vec1::<f32>())
        .collect::<candle_core::Result<Vec<_>>>()?)
}

#[test]
fn loss_is_negative_log_prob_times_reward() -> Result<()> {
    let (policy, varmap) = tiny_policy()?;
    let mut agent = reinforce(varmap, 1e-4)?;
    let generation = rollout(&policy, 0)?;
    let log_prob = generation.record.log_prob_value()?;
    let loss = agent.update(generation.record, 2.5)?;
    assert!((loss - (-log_prob * 2.5)).abs() < 1e-4);
    Ok(())
}

#[test]
fn loss_grows_as_reward_shrinks() -> Result<()> {
    let (policy, _varmap) = tiny_policy()?;
    let generation = rollout(&policy, 1)?;
    let losses = [2.0f32, 1.0, 0.0, -1.0]
        .iter()
        .map(|&reward| {
            Reinforce::<PolicyLM>::policy_loss(&generation.record, reward)?
                .to_scalar::<f32>()
                .map_err(Into::into)
        })
        .collect::<Result<Vec<f32>>>()?;
    for pair in losses.windows(2) {
        assert!(pair[0] < pair[1], "losses not increasing: {losses:?}");
    }
    Ok(())
}

#[test]
fn update_changes_parameters() -> Result<()> {
    let (policy, varmap) = tiny_policy()?;
    let before = snapshot(&varmap)?;
    let mut agent = reinforce(varmap.clone(), 1e-3)?;
    agent.update(rollout(&policy, 2)?.record, 1.0)?;
    let after = snapshot(&varmap)?;
    assert_ne!(before, after);
    Ok(())
}

#[test]
fn non_finite_loss_leaves_parameters_untouched() -> Result<()> {
    let (policy, varmap) = tiny_policy()?;
    let before = snapshot(&varmap)?;
    let mut agent = reinforce(varmap.clone(), 1e-3)?;
    assert!(agent.update(rollout(&policy, 4)?.record, f32::INFINITY).is_err());
    assert!(agent.update(rollout(&policy, 5)?.record, f32::MAX).is_err());
    assert_eq!(before, snapshot(&varmap)?);

    let generation = rollout(&policy, 6)?;
    assert!(generation.record.log_prob_value()?.is_finite());
    Ok(())
}

#[test]
fn gradients_reach_every_parameter() -> Result<()> {
    let (policy, varmap) = tiny_policy()?;
    let generation = rollout(&policy, 3)?;
    let grads = generation.record.log_prob.backward()?;
    for var in varmap.all_vars() {
        assert!(grads.get(var.as_tensor()).is_some());
    }
    Ok(())
}

fn log_prob_shift(reward: f32, seed: u64) -> Result<f32> {
    let (policy, varmap) = tiny_policy()?;
    let mut agent = reinforce(varmap, 1e-4)?;
    let generation = rollout(&policy, seed)?;
    let prompt_ids = generation.record.prompt_ids.clone();
    let generated_ids = generation.record.generated_ids.clone();
    let before = sequence_log_prob(&policy, &prompt_ids, &generated_ids)?.to_scalar::<f32>()?;
    agent.update(generation.record, reward)?;
    let after = sequence_log_prob(&policy, &prompt_ids, &generated_ids)?.to_scalar::<f32>()?;
    Ok(after - before)
}

#[test]
fn positive_reward_makes_the_sequence_more_likely() -> Result<()> {
    let shift = log_prob_shift(1.0, 4)?;
    assert!(shift > 0.0, "log-prob moved by {shift}");
    Ok(())
}

#[test]
fn negative_reward_makes_the_sequence_less_likely() -> Result<()> {
    let shift = log_prob_shift(-1.0, 4)?;
    assert!(shift < 0.0, "log-prob moved by {shift}");
    Ok(())
}
