//! Model host: a pretrained encoder-decoder translation model served from ONNX
//!
//! The model directory is an `optimum` export of an NLLB / M2M100 style
//! checkpoint:
//!
//! - `encoder_model.onnx`: `input_ids`, `attention_mask` → `last_hidden_state`
//! - `decoder_model.onnx`: `input_ids`, `encoder_attention_mask`,
//!   `encoder_hidden_states` → `logits`
//! - `tokenizer.json`
//!
//! Everything is loaded once by [`ModelHost::load`] and is read-only afterwards.

use ndarray::{Array2, ArrayD};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::{debug, info, trace};

use crate::core::config::{Device, ModelConfig};
use crate::core::errors::{Result, TranslationError};

const ENCODER_FILE: &str = "encoder_model.onnx";
const DECODER_FILE: &str = "decoder_model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
const EOS_TOKEN: &str = "</s>";

/// Anything that turns source text into target text.
///
/// Implementations must be usable from several request tasks; a single
/// inference pass at a time is fine.
pub trait TranslationEngine: Send + Sync {
    /// Name reported to clients
    fn model_name(&self) -> &str;

    /// Translate one piece of text
    fn translate(&self, text: &str) -> Result<String>;
}

/// Shared handle to the loaded engine
pub type SharedEngine = Arc<dyn TranslationEngine>;

/// Process-wide model state
pub struct ModelHost;

impl ModelHost {
    /// Load the configured model. Any failure here is meant to abort startup.
    pub fn load(config: &ModelConfig) -> Result<SharedEngine> {
        config.validate()?;
        let model = OnnxTranslator::new(config)?;
        Ok(Arc::new(model))
    }
}

struct Sessions {
    encoder: Session,
    decoder: Session,
}

/// Greedy seq2seq translator on ONNX Runtime
pub struct OnnxTranslator {
    name: String,
    sessions: Mutex<Sessions>,
    tokenizer: Tokenizer,
    source_lang_id: i64,
    target_lang_id: i64,
    eos_id: i64,
    max_input_tokens: usize,
    max_new_tokens: usize,
}

impl std::fmt::Debug for OnnxTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxTranslator")
            .field("name", &self.name)
            .field("source_lang_id", &self.source_lang_id)
            .field("target_lang_id", &self.target_lang_id)
            .finish_non_exhaustive()
    }
}

impl OnnxTranslator {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model_dir = config.model_dir.as_path();
        let encoder_path = model_dir.join(ENCODER_FILE);
        let decoder_path = model_dir.join(DECODER_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);

        for path in [&encoder_path, &decoder_path, &tokenizer_path] {
            if !path.exists() {
                return Err(TranslationError::ModelLoadError {
                    message: format!("Model file not found: {}", path.display()),
                });
            }
        }

        info!("Loading tokenizer from {}", tokenizer_path.display());
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            TranslationError::ModelLoadError {
                message: format!("Cannot load tokenizer: {}", e),
            }
        })?;

        let source_lang_id = special_token_id(&tokenizer, &config.source_lang)?;
        let target_lang_id = special_token_id(&tokenizer, &config.target_lang)?;
        let eos_id = special_token_id(&tokenizer, EOS_TOKEN)?;

        info!("Loading encoder from {}", encoder_path.display());
        let encoder = init_session(&encoder_path, config.device)?;

        info!("Loading decoder from {}", decoder_path.display());
        let decoder = init_session(&decoder_path, config.device)?;

        info!(
            model = %config.name,
            source = %config.source_lang,
            target = %config.target_lang,
            "Model loaded"
        );

        Ok(Self {
            name: config.name.clone(),
            sessions: Mutex::new(Sessions { encoder, decoder }),
            tokenizer,
            source_lang_id,
            target_lang_id,
            eos_id,
            max_input_tokens: config.max_input_tokens,
            max_new_tokens: config.max_new_tokens,
        })
    }

    /// `[src_lang] tokens </s>`, truncated to `max_input_tokens`
    fn encode_source(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self.tokenizer.encode(text, false).map_err(|e| {
            TranslationError::TokenizationError {
                message: e.to_string(),
            }
        })?;

        Ok(frame_source_ids(
            encoding.get_ids(),
            self.source_lang_id,
            self.eos_id,
            self.max_input_tokens,
        ))
    }

    fn generate(&self, source_ids: &[i64]) -> Result<Vec<i64>> {
        let mut sessions = self.sessions.lock().map_err(|_| TranslationError::InferenceError {
            message: "Model lock poisoned".to_string(),
        })?;

        let source_len = source_ids.len();
        let input_ids = Array2::from_shape_vec((1, source_len), source_ids.to_vec())?.into_dyn();
        let attention_mask = Array2::<i64>::ones((1, source_len)).into_dyn();

        trace!("Running encoder on {} tokens", source_len);
        let encoder_hidden_states: ArrayD<f32> = {
            let outputs = sessions.encoder.run(inputs![
                "input_ids" => TensorRef::from_array_view(input_ids.view())?,
                "attention_mask" => TensorRef::from_array_view(attention_mask.view())?,
            ])?;
            outputs
                .get("last_hidden_state")
                .ok_or_else(|| TranslationError::InferenceError {
                    message: "Encoder output last_hidden_state not found".to_string(),
                })?
                .try_extract_array::<f32>()?
                .to_owned()
        };

        // Decoder starts from `</s>` and is forced onto the target language
        let mut tokens: Vec<i64> = vec![self.eos_id, self.target_lang_id];

        while tokens.len() - 2 < self.max_new_tokens {
            let decoder_ids = Array2::from_shape_vec((1, tokens.len()), tokens.clone())?.into_dyn();

            let next_token = {
                let outputs = sessions.decoder.run(inputs![
                    "input_ids" => TensorRef::from_array_view(decoder_ids.view())?,
                    "encoder_attention_mask" => TensorRef::from_array_view(attention_mask.view())?,
                    "encoder_hidden_states" => TensorRef::from_array_view(encoder_hidden_states.view())?,
                ])?;

                let logits = outputs
                    .get("logits")
                    .ok_or_else(|| TranslationError::InferenceError {
                        message: "Decoder output logits not found".to_string(),
                    })?
                    .try_extract_array::<f32>()?;

                let last_pos = logits.shape()[1] - 1;
                let last_logits = logits.slice(ndarray::s![0, last_pos, ..]);
                argmax(last_logits.iter().copied()).unwrap_or(self.eos_id)
            };

            tokens.push(next_token);
            if next_token == self.eos_id {
                break;
            }
        }

        trace!("Generated {} tokens", tokens.len());
        Ok(tokens)
    }

    fn decode(&self, tokens: &[i64]) -> Result<String> {
        let ids: Vec<u32> = tokens
            .iter()
            .filter_map(|&id| u32::try_from(id).ok())
            .collect();

        let text = self.tokenizer.decode(&ids, true).map_err(|e| {
            TranslationError::TokenizationError {
                message: e.to_string(),
            }
        })?;

        Ok(text.trim().to_string())
    }
}

impl TranslationEngine for OnnxTranslator {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn translate(&self, text: &str) -> Result<String> {
        let source_ids = self.encode_source(text)?;
        debug!("Translating {} source tokens", source_ids.len());

        let tokens = self.generate(&source_ids)?;
        self.decode(&tokens)
    }
}

fn init_session(path: &Path, device: Device) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers(execution_providers(device))?
        .commit_from_file(path)?;

    for input in &session.inputs {
        debug!("Model input: name={}, type={:?}", input.name, input.input_type);
    }

    Ok(session)
}

/// Providers in preference order; ORT falls back to the next one when a
/// provider is unavailable at runtime.
fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();

    #[cfg(feature = "cuda")]
    if device != Device::Cpu {
        providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
    }

    #[cfg(not(feature = "cuda"))]
    if device == Device::Cuda {
        tracing::warn!("Built without the `cuda` feature, running on CPU");
    }

    providers.push(CPUExecutionProvider::default().build());
    providers
}

fn special_token_id(tokenizer: &Tokenizer, token: &str) -> Result<i64> {
    tokenizer
        .token_to_id(token)
        .map(i64::from)
        .ok_or_else(|| TranslationError::ModelLoadError {
            message: format!("Token {} not in tokenizer vocabulary", token),
        })
}

fn frame_source_ids(ids: &[u32], lang_id: i64, eos_id: i64, max_tokens: usize) -> Vec<i64> {
    let keep = ids.len().min(max_tokens.saturating_sub(2));
    let mut framed = Vec::with_capacity(keep + 2);
    framed.push(lang_id);
    framed.extend(ids[..keep].iter().map(|&id| i64::from(id)));
    framed.push(eos_id);
    framed
}

fn argmax(values: impl Iterator<Item = f32>) -> Option<i64> {
    values
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_source_ids() {
        assert_eq!(frame_source_ids(&[10, 11, 12], 7, 2, 512), vec![7, 10, 11, 12, 2]);
    }

    #[test]
    fn test_frame_source_ids_truncates() {
        assert_eq!(frame_source_ids(&[10, 11, 12, 13], 7, 2, 4), vec![7, 10, 11, 2]);
        assert_eq!(frame_source_ids(&[], 7, 2, 4), vec![7, 2]);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax([0.1, 2.5, -1.0, 2.4].into_iter()), Some(1));
        assert_eq!(argmax(std::iter::empty()), None);
    }

    #[test]
    fn test_load_missing_model_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            model_dir: dir.path().join("missing"),
            ..Default::default()
        };

        match ModelHost::load(&config) {
            Err(TranslationError::ModelLoadError { message }) => {
                assert!(message.contains(ENCODER_FILE));
            }
            other => panic!("expected model load error, got {:?}", other.map(|_| ())),
        }
    }
}
