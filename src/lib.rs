//! # llmsim - LLM simulation pipeline
//!
//! Builds prompts from a table of linguistic stimuli, queries hosted chat
//! models with them, and scores candidate answer options against local
//! open-weight models via pseudo-log-likelihoods.

pub mod error;
pub mod masking;
pub mod model;
pub mod prompts;
pub mod scoring;
pub mod table;
pub mod types;

mod query;

// Re-exports
pub use error::{LlmsimError, Result};
pub use masking::{token_mask_ids, token_mask_pairs, word_mask_pairs, OptionTokenizer, Sentinels};
pub use model::{load_model, LocalModel, LogProbModel};
pub use prompts::{build_prompts, read_instruction, rewrite_markup};
pub use query::{output_file_name, read_api_key, QueryRunner};
pub use scoring::{
    conditional_log_likelihood, mask_and_sum, mutual_information_ratio, score_option,
    score_options, softmax, OptionScore, DEFAULT_IGNORE_IDS,
};
pub use table::Table;
pub use types::{
    DevicePlacement, Granularity, LocalModelConfig, Message, ModelSource, Precision, PromptConfig,
    QueryConfig, Role, RunMetadata, Suffix,
};
