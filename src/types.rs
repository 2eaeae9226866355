use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a model's weights live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSource {
    /// Served by the hosted chat-completions API
    #[default]
    Hosted,
    /// Local T5-style encoder-decoder with sentinel masking
    EncoderDecoder,
    /// Local decoder-only language model
    Causal,
}

impl ModelSource {
    pub fn is_local(&self) -> bool {
        !matches!(self, ModelSource::Hosted)
    }
}

/// Masking granularity for pseudo-likelihood scoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Word,
    Token,
}

/// Numeric precision of local model weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    Bf16,
}

impl From<Precision> for candle_core::DType {
    fn from(p: Precision) -> Self {
        match p {
            Precision::F32 => candle_core::DType::F32,
            Precision::F16 => candle_core::DType::F16,
            Precision::Bf16 => candle_core::DType::BF16,
        }
    }
}

/// Device placement for local models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlacement {
    /// CUDA device 0 if available, otherwise CPU
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
}

impl DevicePlacement {
    pub fn resolve(&self) -> crate::Result<candle_core::Device> {
        Ok(match self {
            DevicePlacement::Auto => candle_core::Device::cuda_if_available(0)?,
            DevicePlacement::Cpu => candle_core::Device::Cpu,
            DevicePlacement::Cuda(ordinal) => candle_core::Device::new_cuda(*ordinal)?,
        })
    }
}

/// Configuration for loading a local model
#[derive(Debug, Clone)]
pub struct LocalModelConfig {
    /// HuggingFace hub id, e.g. "google/flan-t5-large"
    pub model_id: String,
    pub source: ModelSource,
    pub device: DevicePlacement,
    pub precision: Precision,
}

impl LocalModelConfig {
    /// Encoder-decoder models default to F32, causal models to F16
    pub fn new(model_id: impl Into<String>, source: ModelSource) -> Self {
        let precision = match source {
            ModelSource::Causal => Precision::F16,
            _ => Precision::F32,
        };
        Self {
            model_id: model_id.into(),
            source,
            device: DevicePlacement::default(),
            precision,
        }
    }

    pub fn with_device(mut self, device: DevicePlacement) -> Self {
        self.device = device;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }
}

/// OpenAI-style message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Configuration for the prompt builder
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Condition codes kept for prompt generation
    pub conditions: Vec<String>,
    /// Replacement for the opening `<b>` marker
    pub open_marker: String,
    /// Replacement for the closing `</b>` marker
    pub close_marker: String,
    /// Flag columns dropped from the output table
    pub drop_columns: Vec<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            conditions: vec!["k".into(), "p".into(), "n".into()],
            open_marker: "<Beginn der zu bewertenden Aussage>".to_string(),
            close_marker: "<Ende der zu bewertenden Aussage>".to_string(),
            drop_columns: vec!["has_question_2".into(), "has_question_1".into()],
        }
    }
}

impl PromptConfig {
    pub fn with_conditions<I, S>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions = conditions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_markers(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.open_marker = open.into();
        self.close_marker = close.into();
        self
    }
}

/// Optional tag appended to output file names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    NoStory,
}

impl Suffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Suffix::NoStory => "no-story",
        }
    }
}

/// Token id of "\n" in the hosted model's BPE vocabulary
pub const NEWLINE_TOKEN_ID: u32 = 198;

/// Configuration for the hosted-model query runner
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub model: String,
    /// 0.0 approximates argmax decoding; the service does not guarantee it
    pub temperature: f32,
    pub seed: i64,
    pub suffix: Option<Suffix>,
    /// Only recorded in the output file name
    pub num_examples: u32,
    pub max_tokens: u32,
    /// Token ids suppressed during generation, mapped to their bias
    pub logit_bias: HashMap<u32, i32>,
    /// Base URL for API (optional, for compatible endpoints)
    pub base_url: Option<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            seed: 0,
            suffix: None,
            num_examples: 0,
            max_tokens: 1,
            logit_bias: HashMap::from([(NEWLINE_TOKEN_ID, -100)]),
            base_url: None,
        }
    }
}

impl QueryConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_suffix(mut self, suffix: Option<Suffix>) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn with_num_examples(mut self, n: u32) -> Self {
        self.num_examples = n;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Metadata attached to every row of this run
    pub fn metadata(&self) -> RunMetadata {
        RunMetadata {
            model: self.model.clone(),
            temperature: self.temperature,
            seed: self.seed,
        }
    }
}

/// Run-level values recorded on every output row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub model: String,
    pub temperature: f32,
    pub seed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_config_default() {
        let config = QueryConfig::default();
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.max_tokens, 1);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.logit_bias.get(&198), Some(&-100));
    }

    #[test]
    fn test_query_config_builder() {
        let config = QueryConfig::new("gpt-4")
            .with_temperature(0.7)
            .with_seed(3)
            .with_suffix(Some(Suffix::NoStory))
            .with_num_examples(5);

        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.seed, 3);
        assert_eq!(config.suffix, Some(Suffix::NoStory));
        assert_eq!(config.num_examples, 5);
        assert_eq!(
            config.metadata(),
            RunMetadata { model: "gpt-4".into(), temperature: 0.7, seed: 3 }
        );
    }

    #[test]
    fn test_local_model_precision_defaults() {
        let t5 = LocalModelConfig::new("google/flan-t5-large", ModelSource::EncoderDecoder);
        assert_eq!(t5.precision, Precision::F32);

        let llama = LocalModelConfig::new("meta-llama/Llama-2-7b-hf", ModelSource::Causal)
            .with_device(DevicePlacement::Cpu);
        assert_eq!(llama.precision, Precision::F16);
        assert_eq!(llama.device, DevicePlacement::Cpu);
        assert!(llama.source.is_local());
        assert!(!ModelSource::Hosted.is_local());
    }

    #[test]
    fn test_local_model_precision_override() {
        let config = LocalModelConfig::new("meta-llama/Llama-2-7b-hf", ModelSource::Causal)
            .with_precision(Precision::Bf16);
        assert_eq!(config.precision, Precision::Bf16);
        assert_eq!(candle_core::DType::from(config.precision), candle_core::DType::BF16);
    }
}
