//! Masked input/target pairs for pseudo-likelihood scoring
//!
//! An answer option is scored by masking one piece of it at a time (a word
//! or a token) and asking an encoder-decoder model to fill the sentinel back
//! in. Each piece yields one (input, target) pair; the target carries the
//! sentinels that bracket the masked span.

use candle_core::{Device, Tensor};

use crate::error::{LlmsimError, Result};

/// Sentinel markers of a T5-style vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    pub first: String,
    pub second: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            first: "<extra_id_0>".to_string(),
            second: "<extra_id_1>".to_string(),
        }
    }
}

/// The tokenizer surface the maskers need
pub trait OptionTokenizer {
    /// Token ids of `text` without special tokens and with any trailing
    /// end-of-sequence id removed
    fn encode_ids(&self, text: &str) -> Result<Vec<u32>>;

    /// Id of a single vocabulary entry
    fn token_id(&self, token: &str) -> Option<u32>;

    fn eos_token_id(&self) -> Option<u32>;

    /// Beginning-of-sequence id, if the vocabulary has one
    fn bos_token_id(&self) -> Option<u32> {
        None
    }
}

impl OptionTokenizer for tokenizers::Tokenizer {
    fn encode_ids(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .encode(text, false)
            .map_err(|e| LlmsimError::Tokenizer(e.to_string()))?;
        let mut ids = encoding.get_ids().to_vec();
        if let Some(eos) = OptionTokenizer::eos_token_id(self) {
            if ids.last() == Some(&eos) {
                ids.pop();
            }
        }
        Ok(ids)
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        self.token_to_id(token)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.token_to_id("</s>")
    }

    fn bos_token_id(&self) -> Option<u32> {
        ["<s>", "<|begin_of_text|>"]
            .iter()
            .find_map(|token| self.token_to_id(token))
    }
}

fn option_words(option: &str) -> Result<Vec<&str>> {
    let words: Vec<&str> = option.split_whitespace().collect();
    if words.is_empty() {
        return Err(LlmsimError::InvalidOption(format!(
            "option {:?} has no words to mask",
            option
        )));
    }
    Ok(words)
}

/// Word-by-word (input, target) string pairs for one option
///
/// A single word gives `(prompt + s0, s0 + word)`. Otherwise word `i` is
/// replaced by the first sentinel inside the option text and the target
/// brackets it: `"w s0"` for the first word, `"s0 w"` for the last and
/// `"s0 w s1"` for interior words. Returns one pair per word.
pub fn word_mask_pairs(
    prompt: &str,
    option: &str,
    sentinels: &Sentinels,
) -> Result<Vec<(String, String)>> {
    let words = option_words(option)?;
    let s0 = &sentinels.first;
    let s1 = &sentinels.second;

    if let [word] = words.as_slice() {
        return Ok(vec![(format!("{prompt}{s0}"), format!("{s0}{word}"))]);
    }

    let last = words.len() - 1;
    let pairs = words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let before = words[..i].join(" ");
            let after = words[i + 1..].join(" ");
            let masked = format!("{before} {s0} {after}");
            let target = if i == 0 {
                format!("{word} {s0}")
            } else if i == last {
                format!("{s0} {word}")
            } else {
                format!("{s0} {word} {s1}")
            };
            (format!("{prompt}{}", masked.trim()), target)
        })
        .collect();

    Ok(pairs)
}

/// Token-by-token (input ids, target ids) pairs for one option
///
/// Prompt and option are tokenized separately. For option token `i` the
/// input is the prompt followed by the option with position `i` replaced by
/// the first sentinel id, closed with EOS. The target holds the true token
/// bracketed like in [`word_mask_pairs`], also closed with EOS.
pub fn token_mask_ids<T: OptionTokenizer + ?Sized>(
    prompt: &str,
    option: &str,
    tokenizer: &T,
    sentinels: &Sentinels,
) -> Result<Vec<(Vec<u32>, Vec<u32>)>> {
    option_words(option)?;

    let lookup = |token: &str| {
        tokenizer.token_id(token).ok_or_else(|| {
            LlmsimError::Tokenizer(format!("'{}' is not in the vocabulary", token))
        })
    };
    let s0 = lookup(&sentinels.first)?;
    let s1 = lookup(&sentinels.second)?;
    let eos = tokenizer
        .eos_token_id()
        .ok_or_else(|| LlmsimError::Tokenizer("tokenizer has no end-of-sequence token".into()))?;

    let prompt_ids = tokenizer.encode_ids(prompt)?;
    let option_ids = tokenizer.encode_ids(option)?;
    if option_ids.is_empty() {
        return Err(LlmsimError::InvalidOption(format!(
            "option {:?} produced no tokens",
            option
        )));
    }

    let last = option_ids.len() - 1;
    let pairs = option_ids
        .iter()
        .enumerate()
        .map(|(i, &token)| {
            let mut input = Vec::with_capacity(prompt_ids.len() + option_ids.len() + 1);
            input.extend_from_slice(&prompt_ids);
            input.extend_from_slice(&option_ids[..i]);
            input.push(s0);
            input.extend_from_slice(&option_ids[i + 1..]);
            input.push(eos);

            let target = if i == 0 {
                vec![token, s0, eos]
            } else if i == last {
                vec![s0, token, eos]
            } else {
                vec![s0, token, s1, eos]
            };
            (input, target)
        })
        .collect();

    Ok(pairs)
}

/// [`token_mask_ids`] as `[1, n]` tensors on `device`
pub fn token_mask_pairs<T: OptionTokenizer + ?Sized>(
    prompt: &str,
    option: &str,
    tokenizer: &T,
    sentinels: &Sentinels,
    device: &Device,
) -> Result<Vec<(Tensor, Tensor)>> {
    token_mask_ids(prompt, option, tokenizer, sentinels)?
        .into_iter()
        .map(|(input, target)| -> Result<(Tensor, Tensor)> {
            let input = Tensor::new(input.as_slice(), device)?.unsqueeze(0)?;
            let target = Tensor::new(target.as_slice(), device)?.unsqueeze(0)?;
            Ok((input, target))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Whitespace tokenizer over a fixed vocabulary with T5 special ids
    pub(crate) struct VocabTokenizer {
        vocab: HashMap<String, u32>,
        bos: Option<u32>,
    }

    impl VocabTokenizer {
        pub(crate) fn new(words: &[(&str, u32)]) -> Self {
            let mut vocab: HashMap<String, u32> = words
                .iter()
                .map(|(w, id)| (w.to_string(), *id))
                .collect();
            vocab.insert("</s>".into(), 1);
            vocab.insert("<extra_id_0>".into(), 32099);
            vocab.insert("<extra_id_1>".into(), 32098);
            Self { vocab, bos: None }
        }

        /// Adds a `<s>` entry, as in Llama vocabularies
        pub(crate) fn with_bos(mut self, id: u32) -> Self {
            self.vocab.insert("<s>".into(), id);
            self.bos = Some(id);
            self
        }
    }

    impl OptionTokenizer for VocabTokenizer {
        fn encode_ids(&self, text: &str) -> Result<Vec<u32>> {
            let spaced = text
                .replace("<extra_id_0>", " <extra_id_0> ")
                .replace("<extra_id_1>", " <extra_id_1> ");
            spaced
                .split_whitespace()
                .map(|w| {
                    self.vocab
                        .get(w)
                        .copied()
                        .ok_or_else(|| LlmsimError::Tokenizer(format!("unknown word {w}")))
                })
                .collect()
        }

        fn token_id(&self, token: &str) -> Option<u32> {
            self.vocab.get(token).copied()
        }

        fn eos_token_id(&self) -> Option<u32> {
            Some(1)
        }

        fn bos_token_id(&self) -> Option<u32> {
            self.bos
        }
    }

    #[test]
    fn test_single_word_option() {
        let pairs = word_mask_pairs("Farbe: ", "rot", &Sentinels::default()).unwrap();
        assert_eq!(
            pairs,
            vec![("Farbe: <extra_id_0>".to_string(), "<extra_id_0>rot".to_string())]
        );
    }

    #[test]
    fn test_three_word_option() {
        let pairs = word_mask_pairs("P: ", "sehr rot leuchtend", &Sentinels::default()).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "P: <extra_id_0> rot leuchtend");
        assert_eq!(pairs[0].1, "sehr <extra_id_0>");
        assert_eq!(pairs[1].0, "P: sehr <extra_id_0> leuchtend");
        assert_eq!(pairs[1].1, "<extra_id_0> rot <extra_id_1>");
        assert_eq!(pairs[2].0, "P: sehr rot <extra_id_0>");
        assert_eq!(pairs[2].1, "<extra_id_0> leuchtend");
    }

    #[test]
    fn test_one_pair_per_word() {
        let option = "a b c d e";
        let pairs = word_mask_pairs("", option, &Sentinels::default()).unwrap();
        assert_eq!(pairs.len(), 5);
        let interior = pairs[1..4]
            .iter()
            .all(|(_, t)| t.starts_with("<extra_id_0>") && t.ends_with("<extra_id_1>"));
        assert!(interior);
    }

    #[test]
    fn test_empty_option_rejected() {
        for option in ["", "   "] {
            assert!(matches!(
                word_mask_pairs("p", option, &Sentinels::default()),
                Err(LlmsimError::InvalidOption(_))
            ));
        }
        let tok = VocabTokenizer::new(&[]);
        assert!(matches!(
            token_mask_ids("", "", &tok, &Sentinels::default()),
            Err(LlmsimError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_token_level_layout() {
        let tok = VocabTokenizer::new(&[("wie", 10), ("rot", 20), ("sehr", 30), ("hell", 40)]);
        let pairs = token_mask_ids("wie", "sehr rot hell", &tok, &Sentinels::default()).unwrap();
        assert_eq!(pairs.len(), 3);

        assert_eq!(pairs[0].0, vec![10, 32099, 20, 40, 1]);
        assert_eq!(pairs[0].1, vec![30, 32099, 1]);

        assert_eq!(pairs[1].0, vec![10, 30, 32099, 40, 1]);
        assert_eq!(pairs[1].1, vec![32099, 20, 32098, 1]);

        assert_eq!(pairs[2].0, vec![10, 30, 20, 32099, 1]);
        assert_eq!(pairs[2].1, vec![32099, 40, 1]);
    }

    #[test]
    fn test_token_pairs_as_tensors() {
        let tok = VocabTokenizer::new(&[("wie", 10), ("rot", 20)]);
        let pairs =
            token_mask_pairs("wie", "rot", &tok, &Sentinels::default(), &Device::Cpu).unwrap();
        assert_eq!(pairs.len(), 1);
        let (input, target) = &pairs[0];
        assert_eq!(input.dims(), &[1, 3]);
        assert_eq!(input.to_vec2::<u32>().unwrap(), vec![vec![10, 32099, 1]]);
        assert_eq!(target.to_vec2::<u32>().unwrap(), vec![vec![20, 32099, 1]]);
    }

    #[test]
    fn test_missing_sentinel() {
        let tok = VocabTokenizer::new(&[("rot", 20)]);
        let sentinels = Sentinels {
            first: "<mask>".into(),
            second: "<extra_id_1>".into(),
        };
        assert!(matches!(
            token_mask_ids("", "rot", &tok, &sentinels),
            Err(LlmsimError::Tokenizer(_))
        ));
    }
}
