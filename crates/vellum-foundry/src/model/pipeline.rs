//! Full decoder graph and the autoregressive decode loop.

use std::{ops::ControlFlow, time::Instant};

use rand::{SeedableRng, rngs::StdRng};
use rustc_hash::FxHashMap;
use vellum_instrumentation::{MetricEvent, record_metric};
use vellum_loader::TensorTable;

use crate::{
    Foundry, FoundryError, generation::{SamplerBuffers, SamplingConfig, StreamDecoder, sample}, kernel::KernelOperator, metals::{Embedding, MatMul, RmsNorm, rope::inverse_frequencies, to_u32}, model::{
        block::{BlockWeights, DecoderBlock}, config::{BLOCK_PARTS, ModelConfig, OUTPUT, OUTPUT_NORM, TOKEN_EMBEDDING, block_tensor}
    }, slot::{SlotGraph, SlotId}, tokenizer::Tokenizer
};

/// Mutable session state of a [`ModelPipeline`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeState {
    /// Position the next forward step runs at.
    pub position: usize,
    /// True until the first prompt of the session has been tokenized.
    pub first_call: bool,
    pub last_token: Option<u32>,
}

impl Default for DecodeState {
    fn default() -> Self {
        Self {
            position: 0,
            first_call: true,
            last_token: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The model produced its end-of-sequence token.
    EndOfSequence,
    /// The token callback returned [`ControlFlow::Break`].
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub prompt_tokens: usize,
    /// Produced tokens, excluding a terminal end-of-sequence token.
    pub tokens: Vec<u32>,
    pub finish: FinishReason,
}

pub struct ModelPipeline {
    config: ModelConfig,
    position: SlotId,
    embedding: KernelOperator<Embedding>,
    blocks: Vec<DecoderBlock>,
    final_norm: KernelOperator<RmsNorm>,
    lm_head: KernelOperator<MatMul>,
    state: DecodeState,
    rng: StdRng,
    sampler_buffers: SamplerBuffers,
}

/// Tensor group used for weight accounting.
fn weight_group(name: &str) -> &'static str {
    if name == TOKEN_EMBEDDING {
        "embedding"
    } else if name == OUTPUT {
        "output"
    } else if name.contains("norm") {
        "norm"
    } else if name.contains(".attn_") {
        "attn"
    } else {
        "ffn"
    }
}

struct WeightLoader<'a> {
    table: &'a dyn TensorTable,
    bytes: FxHashMap<String, u64>,
}

impl WeightLoader<'_> {
    /// Upload `name` as an `f32` storage slot after checking its shape.
    fn load(&mut self, slots: &mut SlotGraph, name: &str, shape: &[usize]) -> Result<SlotId, FoundryError> {
        let info = self.table.tensor_info(name).ok_or_else(|| FoundryError::MissingTensor(name.to_string()))?;
        if info.shape != shape {
            return Err(FoundryError::ShapeMismatch {
                name: name.to_string(),
                expected: shape.to_vec(),
                actual: info.shape.clone(),
            });
        }
        let data = self.table.tensor_f32(name)?;
        let slot = slots.storage::<f32>(name, data.len())?;
        slots.set_value(slot, &data)?;
        *self.bytes.entry(weight_group(name).to_string()).or_default() += (data.len() * size_of::<f32>()) as u64;
        tracing::trace!(tensor = name, ?shape, "weight uploaded");
        Ok(slot)
    }
}

impl ModelPipeline {
    /// Build the full graph from `table`, uploading every weight once.
    pub fn load(foundry: &mut Foundry, table: &dyn TensorTable) -> Result<Self, FoundryError> {
        let started = Instant::now();
        let config = ModelConfig::from_table(table, foundry.config().max_context_len)?;

        let required = [TOKEN_EMBEDDING.to_string(), OUTPUT_NORM.to_string()]
            .into_iter()
            .chain((0..config.block_count).flat_map(|layer| BLOCK_PARTS.iter().map(move |part| block_tensor(layer, part))));
        for name in required {
            if !table.has_tensor(&name) {
                return Err(FoundryError::MissingTensor(name));
            }
        }

        let rng = match foundry.config().sample_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let width = config.embedding_width;
        let mut loader = WeightLoader {
            table,
            bytes: FxHashMap::default(),
        };
        let slots = foundry.slots_mut();

        let position = slots.uniform::<u32>("position", 1)?;
        let freqs = slots.storage::<f32>("rope.freqs", (config.rope_dims / 2).max(1))?;
        let inv_freqs = inverse_frequencies(config.rope_dims, config.rope_freq_base);
        if !inv_freqs.is_empty() {
            slots.set_value(freqs, &inv_freqs)?;
        }

        let table_slot = loader.load(slots, TOKEN_EMBEDDING, &[config.vocab_size, width])?;
        let embedding = Embedding::new(slots, "token_embd", table_slot, config.vocab_size, width)?;

        let mut blocks = Vec::with_capacity(config.block_count);
        let mut upstream = embedding.kernel().output;
        for layer in 0..config.block_count {
            let mut tensor = |part: &str, shape: &[usize]| loader.load(slots, &block_tensor(layer, part), shape);
            let weights = BlockWeights {
                attn_norm: tensor("attn_norm", &[width])?,
                attn_q: tensor("attn_q", &[config.q_width(), width])?,
                attn_k: tensor("attn_k", &[config.kv_width(), width])?,
                attn_v: tensor("attn_v", &[config.kv_width(), width])?,
                attn_output: tensor("attn_output", &[width, config.q_width()])?,
                ffn_norm: tensor("ffn_norm", &[width])?,
                ffn_gate: tensor("ffn_gate", &[config.ffn_width, width])?,
                ffn_up: tensor("ffn_up", &[config.ffn_width, width])?,
                ffn_down: tensor("ffn_down", &[width, config.ffn_width])?,
            };
            let block = DecoderBlock::new(slots, layer, &config, &weights, position, freqs)?;
            slots.bind_to(block.input(), upstream)?;
            upstream = block.output();
            blocks.push(block);
        }

        let norm_gain = loader.load(slots, OUTPUT_NORM, &[width])?;
        let final_norm = RmsNorm::new(slots, "output_norm", norm_gain, width, config.norm_eps)?;
        slots.bind_to(final_norm.kernel().input, upstream)?;

        let head_weight = if table.has_tensor(OUTPUT) {
            loader.load(slots, OUTPUT, &[config.vocab_size, width])?
        } else {
            tracing::debug!("no {OUTPUT}; LM head tied to {TOKEN_EMBEDDING}");
            table_slot
        };
        let lm_head = MatMul::new(slots, "output", head_weight, width, config.vocab_size)?;
        slots.bind_to(lm_head.kernel().input, final_norm.kernel().output)?;

        let duration = started.elapsed();
        tracing::info!(
            model = %config.name,
            blocks = config.block_count,
            width,
            vocab = config.vocab_size,
            context = config.context_len,
            elapsed_ms = duration.as_millis() as u64,
            "model loaded"
        );
        record_metric!(MetricEvent::ModelLoaded {
            name: config.name.clone(),
            block_count: config.block_count as u32,
            embedding_width: width as u32,
            weight_bytes: loader.bytes,
            duration_ms: duration.as_millis() as u64,
        });

        Ok(Self {
            config,
            position,
            embedding,
            blocks,
            final_norm,
            lm_head,
            state: DecodeState::default(),
            rng,
            sampler_buffers: SamplerBuffers::default(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn state(&self) -> &DecodeState {
        &self.state
    }

    pub fn blocks(&self) -> &[DecoderBlock] {
        &self.blocks
    }

    /// Slot holding the logits of the most recent step.
    pub fn logits_slot(&self) -> SlotId {
        self.lm_head.kernel().output
    }

    /// Run one forward pass for `token` at the current position and advance it.
    ///
    /// A token outside the embedding table is rejected before anything is
    /// uploaded, leaving the position unchanged.
    pub fn step(&mut self, foundry: &mut Foundry, token: u32) -> Result<(), FoundryError> {
        if token as usize >= self.config.vocab_size {
            return Err(FoundryError::TokenOutOfRange {
                token,
                vocab: self.config.vocab_size,
            });
        }
        let position = self.state.position;
        let slots = foundry.slots_mut();
        slots.set_value(self.embedding.kernel().token, &[token])?;
        slots.set_value(self.position, &[to_u32("position", position)?])?;

        self.embedding.compute(foundry)?;
        for block in &mut self.blocks {
            block.forward(foundry, position)?;
        }
        self.final_norm.compute(foundry)?;
        self.lm_head.compute(foundry)?;

        self.state.position += 1;
        Ok(())
    }

    pub fn logits(&self, foundry: &Foundry) -> Result<Vec<f32>, FoundryError> {
        foundry.slots().get_value::<f32>(self.logits_slot())
    }

    /// Generate a continuation of `prompt`.
    ///
    /// The prompt is wrapped in the chat template on the first call of the
    /// session and as a follow-up turn afterwards. Every produced token is fed
    /// back before `on_token` sees it, so the session stays consistent when the
    /// callback breaks. Generation ends at end-of-sequence, which is not passed
    /// to `on_token`, or when `on_token` returns [`ControlFlow::Break`].
    pub fn generate<F>(
        &mut self,
        foundry: &mut Foundry,
        tokenizer: &dyn Tokenizer,
        prompt: &str,
        sampling: &SamplingConfig,
        mut on_token: F,
    ) -> Result<Generation, FoundryError>
    where
        F: FnMut(u32, &str) -> ControlFlow<()>,
    {
        let prompt_ids = tokenizer.tokenize(prompt, self.state.first_call)?;
        if prompt_ids.is_empty() {
            return Err(FoundryError::InvalidOperation("prompt produced no tokens".to_string()));
        }
        self.state.first_call = false;
        tracing::debug!(prompt_tokens = prompt_ids.len(), position = self.state.position, "prefill");

        for &id in &prompt_ids {
            self.step(foundry, id)?;
        }
        self.state.last_token = prompt_ids.last().copied();

        let eos = tokenizer.eos_token_id();
        let mut decoder = StreamDecoder::new();
        let mut tokens = Vec::new();
        let finish = loop {
            let started = Instant::now();
            let logits = self.logits(foundry)?;
            let index = sample(&logits, sampling, &mut self.rng, &mut self.sampler_buffers)?;
            let token = to_u32("token", index)?;
            if Some(token) == eos {
                break FinishReason::EndOfSequence;
            }

            self.step(foundry, token)?;
            self.state.last_token = Some(token);
            tokens.push(token);
            record_metric!(MetricEvent::TokenGenerated {
                position: self.state.position as u64,
                token_id: token,
                latency_us: started.elapsed().as_micros() as u64,
            });

            let text = decoder.push(tokenizer, token)?.unwrap_or_default();
            if on_token(token, &text).is_break() {
                break FinishReason::Cancelled;
            }
        };

        if !decoder.pending().is_empty() {
            tracing::warn!(pending = ?decoder.pending(), "generation ended inside a multi-byte character");
        }

        tracing::debug!(generated = tokens.len(), ?finish, position = self.state.position, "generation finished");
        Ok(Generation {
            prompt_tokens: prompt_ids.len(),
            tokens,
            finish,
        })
    }
}
