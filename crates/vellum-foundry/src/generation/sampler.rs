use rand::Rng;

use crate::FoundryError;

/// Temperature, nucleus and top-k parameters for [`sample`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingConfig {
    /// Values `<= 0` or non-finite select the arg-max.
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

impl SamplingConfig {
    /// Deterministic arg-max decoding.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Self::default()
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0 || !self.temperature.is_finite()
    }
}

/// Workspace reused across sampling invocations to avoid per-token allocations.
#[derive(Default)]
pub struct SamplerBuffers {
    pub scaled: Vec<f32>,
    pub indices: Vec<usize>,
}

/// Clamp the requested `top_k` to the vocabulary size, keeping at least one candidate.
#[inline]
pub fn effective_top_k(top_k: usize, vocab_len: usize) -> usize {
    top_k.max(1).min(vocab_len)
}

/// Index of the largest finite logit; ties resolve to the lowest index.
pub fn argmax(logits: &[f32]) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Draw a token index from `logits`.
///
/// Logits are scaled by `1 / temperature` and softmaxed over the whole
/// vocabulary. The `top_k` most probable candidates are kept, then the shortest
/// prefix whose cumulative probability reaches `top_p` (never empty), and the
/// survivors are renormalized before a single uniform draw. Rounding shortfall
/// at the end of the distribution falls back to the last kept candidate.
pub fn sample<R: Rng>(
    logits: &[f32],
    config: &SamplingConfig,
    rng: &mut R,
    buffers: &mut SamplerBuffers,
) -> Result<usize, FoundryError> {
    let fallback = argmax(logits).ok_or_else(|| FoundryError::Sampling("no finite logits to sample from".to_string()))?;
    if config.is_greedy() {
        return Ok(fallback);
    }

    let temperature = config.temperature;
    let top_k = effective_top_k(config.top_k, logits.len());

    let scaled = &mut buffers.scaled;
    let indices = &mut buffers.indices;
    scaled.clear();
    indices.clear();
    scaled.reserve(top_k);
    indices.reserve(top_k);

    let max_scaled = logits[fallback] / temperature;
    let mut total = 0.0f32;
    for (i, &raw) in logits.iter().enumerate() {
        let scaled_val = raw / temperature;
        if !scaled_val.is_finite() {
            continue;
        }
        let weight = (scaled_val - max_scaled).exp();
        total += weight;

        let insert_pos = scaled.partition_point(|&existing| existing >= weight);
        if indices.len() < top_k {
            scaled.insert(insert_pos, weight);
            indices.insert(insert_pos, i);
        } else if insert_pos < top_k {
            scaled.insert(insert_pos, weight);
            indices.insert(insert_pos, i);
            scaled.pop();
            indices.pop();
        }
    }

    if indices.is_empty() || !(total.is_finite() && total > 0.0) {
        return Ok(fallback);
    }

    let top_p = if config.top_p.is_finite() { config.top_p.clamp(0.0, 1.0) } else { 1.0 };
    let mut cutoff = 0;
    let mut cum = 0.0f32;
    for (i, &weight) in scaled.iter().enumerate() {
        cum += weight / total;
        cutoff = i;
        if cum >= top_p {
            break;
        }
    }
    scaled.truncate(cutoff + 1);
    indices.truncate(cutoff + 1);

    let kept_total: f32 = scaled.iter().sum();
    if !(kept_total.is_finite() && kept_total > 0.0) {
        return Ok(indices[0]);
    }

    let r: f32 = rng.random();
    let mut acc = 0.0f32;
    for (&idx, &weight) in indices.iter().zip(scaled.iter()) {
        acc += weight / kept_total;
        if r < acc {
            return Ok(idx);
        }
    }

    Ok(indices[indices.len() - 1])
}

#[cfg(test)]
#[path = "sampler.test.rs"]
mod tests;
