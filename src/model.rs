//! Local model loading and per-label log-probabilities
//!
//! Weights, config and tokenizer are fetched from the HuggingFace hub. The
//! model kind comes from [`ModelSource`] in the config, never from the name.

use std::collections::HashMap;
use std::path::PathBuf;

use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::{llama, t5};
use hf_hub::api::sync::{Api, ApiRepo};
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::info;

use crate::error::{LlmsimError, Result};
use crate::types::{LocalModelConfig, ModelSource};

/// Models that can score a label sequence against an input sequence
pub trait LogProbModel {
    /// Log-probabilities of shape `[n, vocab]` for the `n` label positions
    ///
    /// Both tensors are `[1, len]` token ids. Row `i` is the distribution
    /// the model assigns to position `i` given the input and labels `..i`.
    fn label_log_probs(&mut self, input_ids: &Tensor, labels: &Tensor) -> Result<Tensor>;
}

/// T5-style conditional generation model
pub struct EncoderDecoderModel {
    model: t5::T5ForConditionalGeneration,
    decoder_start_token_id: u32,
    device: Device,
}

impl LogProbModel for EncoderDecoderModel {
    fn label_log_probs(&mut self, input_ids: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let labels = labels.i(0)?.to_vec1::<u32>()?;
        self.model.clear_kv_cache();
        let encoder_output = self.model.encode(input_ids)?;

        let mut decoder_ids = vec![self.decoder_start_token_id];
        let mut rows = Vec::with_capacity(labels.len());
        for &label in &labels {
            // decode() only returns logits for the last decoder position
            self.model.clear_kv_cache();
            let decoder_input = Tensor::new(decoder_ids.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .decode(&decoder_input, &encoder_output)?
                .flatten_all()?
                .to_dtype(DType::F32)?;
            rows.push(candle_nn::ops::log_softmax(&logits, D::Minus1)?);
            decoder_ids.push(label);
        }
        self.model.clear_kv_cache();

        Ok(Tensor::stack(&rows, 0)?)
    }
}

/// Decoder-only language model
pub struct CausalModel {
    model: llama::Llama,
    config: llama::Config,
    dtype: DType,
    device: Device,
}

impl LogProbModel for CausalModel {
    fn label_log_probs(&mut self, input_ids: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let mut tokens = input_ids.i(0)?.to_vec1::<u32>()?;
        let labels = labels.i(0)?.to_vec1::<u32>()?;

        let mut rows = Vec::with_capacity(labels.len());
        for &label in &labels {
            let mut cache = llama::Cache::new(false, self.dtype, &self.config, &self.device)?;
            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .forward(&input, 0, &mut cache)?
                .flatten_all()?
                .to_dtype(DType::F32)?;
            rows.push(candle_nn::ops::log_softmax(&logits, D::Minus1)?);
            tokens.push(label);
        }

        Ok(Tensor::stack(&rows, 0)?)
    }
}

/// A loaded local model
pub enum LocalModel {
    EncoderDecoder(EncoderDecoderModel),
    Causal(CausalModel),
}

impl LocalModel {
    pub fn source(&self) -> ModelSource {
        match self {
            LocalModel::EncoderDecoder(_) => ModelSource::EncoderDecoder,
            LocalModel::Causal(_) => ModelSource::Causal,
        }
    }

    /// Device the weights live on; inputs must be placed here
    pub fn device(&self) -> &Device {
        match self {
            LocalModel::EncoderDecoder(m) => &m.device,
            LocalModel::Causal(m) => &m.device,
        }
    }
}

impl LogProbModel for LocalModel {
    fn label_log_probs(&mut self, input_ids: &Tensor, labels: &Tensor) -> Result<Tensor> {
        match self {
            LocalModel::EncoderDecoder(m) => m.label_log_probs(input_ids, labels),
            LocalModel::Causal(m) => m.label_log_probs(input_ids, labels),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Single-file or sharded safetensors weights of a hub repo
fn weight_paths(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    if let Ok(index_path) = repo.get("model.safetensors.index.json") {
        let index: SafetensorsIndex = serde_json::from_str(&std::fs::read_to_string(index_path)?)?;
        let mut shards: Vec<String> = index.weight_map.into_values().collect();
        shards.sort();
        shards.dedup();
        info!("Downloading {} shard files...", shards.len());
        return shards
            .iter()
            .map(|name| repo.get(name).map_err(LlmsimError::from))
            .collect();
    }
    Ok(vec![repo.get("model.safetensors")?])
}

/// Load tokenizer and model for a local model id
///
/// Returns `None` for [`ModelSource::Hosted`]: those models have no local
/// weights and are queried through the hosted API instead.
pub fn load_model(config: &LocalModelConfig) -> Result<Option<(Tokenizer, LocalModel)>> {
    if !config.source.is_local() {
        info!("Model {} is hosted, nothing to load", config.model_id);
        return Ok(None);
    }

    let device = config.device.resolve()?;
    let dtype: DType = config.precision.into();
    info!("Loading model: {}", config.model_id);
    info!("Source: {:?}", config.source);
    info!("Device: {:?}", device);
    info!("Dtype: {:?}", dtype);

    let api = Api::new()?;
    let repo = api.model(config.model_id.clone());

    let tokenizer = Tokenizer::from_file(repo.get("tokenizer.json")?)
        .map_err(|e| LlmsimError::Tokenizer(e.to_string()))?;
    let config_json = std::fs::read_to_string(repo.get("config.json")?)?;
    let weights = weight_paths(&repo)?;
    info!("Loading weights from {} file(s)...", weights.len());

    // SAFETY: the files are not modified while mapped
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &device)? };

    let model = match config.source {
        ModelSource::EncoderDecoder => {
            let t5_config: t5::Config = serde_json::from_str(&config_json)?;
            let decoder_start_token_id = t5_config
                .decoder_start_token_id
                .unwrap_or(t5_config.pad_token_id) as u32;
            let model = t5::T5ForConditionalGeneration::load(vb, &t5_config)?;
            LocalModel::EncoderDecoder(EncoderDecoderModel {
                model,
                decoder_start_token_id,
                device,
            })
        }
        ModelSource::Causal => {
            let llama_config: llama::LlamaConfig = serde_json::from_str(&config_json)?;
            let llama_config = llama_config.into_config(false);
            let model = llama::Llama::load(vb, &llama_config)?;
            LocalModel::Causal(CausalModel {
                model,
                config: llama_config,
                dtype,
                device,
            })
        }
        ModelSource::Hosted => return Err(LlmsimError::HostedModel(config.model_id.clone())),
    };

    Ok(Some((tokenizer, model)))
}
