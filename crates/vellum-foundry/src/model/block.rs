//! One transformer layer wired as a fixed sub-graph of operators.
//!
//! Operators are linked with [`SlotGraph::bind_to`] at construction, so a
//! forward pass only writes the position uniform, dispatches each operator in
//! order and performs the two residual adds.

use crate::{
    Foundry, FoundryError, kernel::KernelOperator, metals::{
        AttentionScore, ElementwiseMul, MatMul, RmsNorm, Rope, Silu, Softmax, ValueSum, attention_score::AttentionShape, rope::RopeShape, to_u32
    }, model::config::ModelConfig, slot::{SlotGraph, SlotId}
};

/// Weight slots of one layer, `[out, in]` for projections.
#[derive(Clone, Copy, Debug)]
pub struct BlockWeights {
    pub attn_norm: SlotId,
    pub attn_q: SlotId,
    pub attn_k: SlotId,
    pub attn_v: SlotId,
    pub attn_output: SlotId,
    pub ffn_norm: SlotId,
    pub ffn_gate: SlotId,
    pub ffn_up: SlotId,
    pub ffn_down: SlotId,
}

pub struct DecoderBlock {
    layer: usize,
    position: SlotId,
    attn_norm: KernelOperator<RmsNorm>,
    q_proj: KernelOperator<MatMul>,
    k_proj: KernelOperator<MatMul>,
    v_proj: KernelOperator<MatMul>,
    rope_q: KernelOperator<Rope>,
    rope_k: KernelOperator<Rope>,
    score: KernelOperator<AttentionScore>,
    softmax: KernelOperator<Softmax>,
    value_sum: KernelOperator<ValueSum>,
    attn_out: KernelOperator<MatMul>,
    /// Input plus attention branch.
    attn_residual: SlotId,
    ffn_norm: KernelOperator<RmsNorm>,
    gate: KernelOperator<MatMul>,
    up: KernelOperator<MatMul>,
    silu: KernelOperator<Silu>,
    mul: KernelOperator<ElementwiseMul>,
    down: KernelOperator<MatMul>,
    output: SlotId,
}

impl DecoderBlock {
    /// `position` is the shared position uniform and `freqs` the shared RoPE
    /// frequency table.
    pub fn new(
        slots: &mut SlotGraph,
        layer: usize,
        config: &ModelConfig,
        weights: &BlockWeights,
        position: SlotId,
        freqs: SlotId,
    ) -> Result<Self, FoundryError> {
        let prefix = format!("blk.{layer}");
        let p = |name: &str| format!("{prefix}.{name}");
        let width = config.embedding_width;
        let capacity = config.context_len;
        let attention = AttentionShape {
            q_heads: config.q_heads,
            kv_heads: config.kv_heads,
            head_dim: config.head_dim,
            capacity,
        };

        let attn_norm = RmsNorm::new(slots, &p("attn_norm"), weights.attn_norm, width, config.norm_eps)?;
        let normed = attn_norm.kernel().output;

        let q_proj = MatMul::new(slots, &p("attn_q"), weights.attn_q, width, config.q_width())?;
        let k_proj = MatMul::cached(slots, &p("attn_k"), weights.attn_k, width, config.kv_width(), capacity, position)?;
        let v_proj = MatMul::cached(slots, &p("attn_v"), weights.attn_v, width, config.kv_width(), capacity, position)?;
        for proj in [&q_proj, &k_proj, &v_proj] {
            slots.bind_to(proj.kernel().input, normed)?;
        }
        let key_cache = k_proj.kernel().output;
        let value_cache = v_proj.kernel().output;

        let rope_q = Rope::new(
            slots,
            &p("rope_q"),
            None,
            freqs,
            position,
            RopeShape {
                heads: config.q_heads,
                head_dim: config.head_dim,
                rope_dims: config.rope_dims,
                capacity: None,
            },
        )?;
        slots.bind_to(rope_q.kernel().input, q_proj.kernel().output)?;
        let rope_k = Rope::new(
            slots,
            &p("rope_k"),
            Some(key_cache),
            freqs,
            position,
            RopeShape {
                heads: config.kv_heads,
                head_dim: config.head_dim,
                rope_dims: config.rope_dims,
                capacity: Some(capacity),
            },
        )?;

        let score = AttentionScore::new(slots, &p("attn_score"), key_cache, position, attention)?;
        slots.bind_to(score.kernel().query, rope_q.kernel().output)?;
        let softmax = Softmax::new(slots, &p("attn_softmax"), position, config.q_heads, capacity)?;
        slots.bind_to(softmax.kernel().scores, score.kernel().scores)?;
        let value_sum = ValueSum::new(slots, &p("attn_value"), value_cache, position, attention)?;
        slots.bind_to(value_sum.kernel().weights, softmax.kernel().weights)?;

        let attn_out = MatMul::new(slots, &p("attn_output"), weights.attn_output, config.q_width(), width)?;
        slots.bind_to(attn_out.kernel().input, value_sum.kernel().output)?;
        let attn_residual = slots.storage::<f32>(p("attn_residual"), width)?;

        let ffn_norm = RmsNorm::new(slots, &p("ffn_norm"), weights.ffn_norm, width, config.norm_eps)?;
        slots.bind_to(ffn_norm.kernel().input, attn_residual)?;
        let gate = MatMul::new(slots, &p("ffn_gate"), weights.ffn_gate, width, config.ffn_width)?;
        let up = MatMul::new(slots, &p("ffn_up"), weights.ffn_up, width, config.ffn_width)?;
        slots.bind_to(gate.kernel().input, ffn_norm.kernel().output)?;
        slots.bind_to(up.kernel().input, ffn_norm.kernel().output)?;
        let silu = Silu::new(slots, &p("ffn_silu"), config.ffn_width)?;
        slots.bind_to(silu.kernel().input, gate.kernel().output)?;
        let mul = ElementwiseMul::new(slots, &p("ffn_mul"), config.ffn_width)?;
        slots.bind_to(mul.kernel().lhs, silu.kernel().output)?;
        slots.bind_to(mul.kernel().rhs, up.kernel().output)?;
        let down = MatMul::new(slots, &p("ffn_down"), weights.ffn_down, config.ffn_width, width)?;
        slots.bind_to(down.kernel().input, mul.kernel().output)?;

        let output = slots.storage::<f32>(p("out"), width)?;

        Ok(Self {
            layer,
            position,
            attn_norm,
            q_proj,
            k_proj,
            v_proj,
            rope_q,
            rope_k,
            score,
            softmax,
            value_sum,
            attn_out,
            attn_residual,
            ffn_norm,
            gate,
            up,
            silu,
            mul,
            down,
            output,
        })
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    /// Slot the previous stage's output is bound onto.
    pub fn input(&self) -> SlotId {
        self.attn_norm.kernel().input
    }

    pub fn output(&self) -> SlotId {
        self.output
    }

    pub fn key_cache(&self) -> SlotId {
        self.k_proj.kernel().output
    }

    pub fn value_cache(&self) -> SlotId {
        self.v_proj.kernel().output
    }

    /// Run the layer for the token at `position`.
    pub fn forward(&mut self, foundry: &mut Foundry, position: usize) -> Result<(), FoundryError> {
        let _span = tracing::trace_span!("decoder_block", layer = self.layer, position).entered();
        foundry.slots_mut().set_value(self.position, &[to_u32("position", position)?])?;
        self.rope_q.kernel_mut().set_position(position);
        self.rope_k.kernel_mut().set_position(position);

        {
            let f: &Foundry = foundry;
            self.attn_norm.compute(f)?;
            self.q_proj.compute(f)?;
            self.k_proj.compute(f)?;
            self.v_proj.compute(f)?;
            self.rope_q.compute(f)?;
            self.rope_k.compute(f)?;
            self.score.compute(f)?;
            self.softmax.compute(f)?;
            self.value_sum.compute(f)?;
            self.attn_out.compute(f)?;
        }
        residual_add(foundry.slots_mut(), self.input(), self.attn_out.kernel().output, self.attn_residual)?;

        {
            let f: &Foundry = foundry;
            self.ffn_norm.compute(f)?;
            self.gate.compute(f)?;
            self.up.compute(f)?;
            self.silu.compute(f)?;
            self.mul.compute(f)?;
            self.down.compute(f)?;
        }
        residual_add(foundry.slots_mut(), self.attn_residual, self.down.kernel().output, self.output)
    }
}

/// `dst = a + b`, summed on the host.
fn residual_add(slots: &mut SlotGraph, a: SlotId, b: SlotId, dst: SlotId) -> Result<(), FoundryError> {
    let lhs = slots.get_value::<f32>(a)?;
    let rhs = slots.get_value::<f32>(b)?;
    if lhs.len() != rhs.len() {
        return Err(FoundryError::ShapeMismatch {
            name: slots.name(b).to_string(),
            expected: vec![lhs.len()],
            actual: vec![rhs.len()],
        });
    }
    let sum: Vec<f32> = lhs.iter().zip(&rhs).map(|(x, y)| x + y).collect();
    slots.set_value(dst, &sum)
}
