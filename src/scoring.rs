//! Pseudo-log-likelihood scoring of answer options

use candle_core::{DType, Device, IndexOp, Tensor};
use serde::Serialize;
use tracing::debug;

use crate::error::{LlmsimError, Result};
use crate::masking::{token_mask_pairs, word_mask_pairs, OptionTokenizer, Sentinels};
use crate::model::{LocalModel, LogProbModel};
use crate::types::Granularity;

/// `</s>`, `<extra_id_1>` and `<extra_id_0>` in the T5 vocabulary
pub const DEFAULT_IGNORE_IDS: [u32; 3] = [1, 32098, 32099];

/// Sum the log-probabilities of the true tokens of one masked pair
///
/// `labels` is `[1, n]`, `log_probs` is `[n, vocab]`. Positions whose label
/// is in `ignore_ids` are skipped; every other position contributes the
/// log-probability it assigns to its own label.
pub fn mask_and_sum(labels: &Tensor, log_probs: &Tensor, ignore_ids: &[u32]) -> Result<f32> {
    let labels = labels.i(0)?.to_dtype(DType::U32)?.to_vec1::<u32>()?;
    let log_probs = log_probs.to_dtype(DType::F32)?.to_vec2::<f32>()?;
    if labels.len() != log_probs.len() {
        return Err(LlmsimError::Shape(format!(
            "{} labels but {} log-probability rows",
            labels.len(),
            log_probs.len()
        )));
    }

    let mut total = 0.0f32;
    for (position, (&label, row)) in labels.iter().zip(&log_probs).enumerate() {
        if ignore_ids.contains(&label) {
            continue;
        }
        let value = row.get(label as usize).ok_or_else(|| {
            LlmsimError::Shape(format!(
                "token {} at position {} outside vocabulary of {}",
                label,
                position,
                row.len()
            ))
        })?;
        total += value;
    }
    Ok(total)
}

/// Normalise option scores into a probability distribution
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return vec![];
    }

    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.iter().map(|&x| x / sum).collect()
}

/// Ratio of an answer's probability given the stimulus to its baseline
/// probability without it
///
/// Values above 1 mean the stimulus made the answer more likely.
pub fn mutual_information_ratio(conditional: f32, baseline: f32) -> f32 {
    conditional / baseline
}

/// Special ids of `tokenizer` that never count towards a score
pub fn ignore_ids<T: OptionTokenizer + ?Sized>(tokenizer: &T, sentinels: &Sentinels) -> Vec<u32> {
    let ids: Vec<u32> = [
        tokenizer.eos_token_id(),
        tokenizer.token_id(&sentinels.second),
        tokenizer.token_id(&sentinels.first),
    ]
    .into_iter()
    .flatten()
    .collect();

    if ids.is_empty() {
        DEFAULT_IGNORE_IDS.to_vec()
    } else {
        ids
    }
}

fn to_row(ids: &[u32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::new(ids, device)?.unsqueeze(0)?)
}

/// Masked pseudo-log-likelihood of one option under an encoder-decoder model
///
/// Builds the word- or token-level pairs, scores each one with
/// [`mask_and_sum`] and returns the sum over all pairs.
pub fn score_option<M, T>(
    model: &mut M,
    tokenizer: &T,
    prompt: &str,
    option: &str,
    granularity: Granularity,
    sentinels: &Sentinels,
    device: &Device,
) -> Result<f32>
where
    M: LogProbModel + ?Sized,
    T: OptionTokenizer + ?Sized,
{
    let pairs = match granularity {
        Granularity::Word => {
            let eos = tokenizer.eos_token_id().ok_or_else(|| {
                LlmsimError::Tokenizer("tokenizer has no end-of-sequence token".into())
            })?;
            word_mask_pairs(prompt, option, sentinels)?
                .into_iter()
                .map(|(input, target)| -> Result<(Tensor, Tensor)> {
                    let mut input_ids = tokenizer.encode_ids(&input)?;
                    input_ids.push(eos);
                    let mut labels = tokenizer.encode_ids(&target)?;
                    labels.push(eos);
                    Ok((to_row(&input_ids, device)?, to_row(&labels, device)?))
                })
                .collect::<Result<Vec<_>>>()?
        }
        Granularity::Token => token_mask_pairs(prompt, option, tokenizer, sentinels, device)?,
    };

    let ignore = ignore_ids(tokenizer, sentinels);
    let mut total = 0.0f32;
    for (i, (input, labels)) in pairs.iter().enumerate() {
        let log_probs = model.label_log_probs(input, labels)?;
        let contribution = mask_and_sum(labels, &log_probs, &ignore)?;
        debug!("option {:?} pair {}: {:.4}", option, i, contribution);
        total += contribution;
    }
    Ok(total)
}

/// Log-likelihood of the option tokens following the prompt
///
/// Used for causal models, which have no sentinel vocabulary to mask with.
/// The prompt is led by the tokenizer's BOS token when it has one.
pub fn conditional_log_likelihood<M, T>(
    model: &mut M,
    tokenizer: &T,
    prompt: &str,
    option: &str,
    device: &Device,
) -> Result<f32>
where
    M: LogProbModel + ?Sized,
    T: OptionTokenizer + ?Sized,
{
    let option_ids = tokenizer.encode_ids(option)?;
    if option_ids.is_empty() {
        return Err(LlmsimError::InvalidOption(format!(
            "option {:?} produced no tokens",
            option
        )));
    }
    let mut input_ids: Vec<u32> = tokenizer.bos_token_id().into_iter().collect();
    input_ids.extend(tokenizer.encode_ids(prompt)?);
    if input_ids.is_empty() {
        return Err(LlmsimError::Config(
            "empty prompt and no beginning-of-sequence token to condition on".to_string(),
        ));
    }

    let input = to_row(&input_ids, device)?;
    let labels = to_row(&option_ids, device)?;
    let log_probs = model.label_log_probs(&input, &labels)?;
    mask_and_sum(&labels, &log_probs, &[])
}

/// Score of one answer option
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OptionScore {
    pub option: String,
    pub log_likelihood: f32,
    pub probability: f32,
}

/// Score every option against the prompt and normalise across options
pub fn score_options<T: OptionTokenizer + ?Sized>(
    model: &mut LocalModel,
    tokenizer: &T,
    prompt: &str,
    options: &[String],
    granularity: Granularity,
    sentinels: &Sentinels,
) -> Result<Vec<OptionScore>> {
    let device = model.device().clone();
    let causal = matches!(model, LocalModel::Causal(_));

    let mut scores = Vec::with_capacity(options.len());
    for option in options {
        let score = if causal {
            conditional_log_likelihood(&mut *model, tokenizer, prompt, option, &device)?
        } else {
            score_option(&mut *model, tokenizer, prompt, option, granularity, sentinels, &device)?
        };
        scores.push(score);
    }

    let probabilities = softmax(&scores);
    Ok(options
        .iter()
        .zip(scores)
        .zip(probabilities)
        .map(|((option, log_likelihood), probability)| OptionScore {
            option: option.clone(),
            log_likelihood,
            probability,
        })
        .collect())
}
