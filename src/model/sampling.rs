//! Single decoding step over one row of next-token logits.

use rand::Rng;

use crate::{error::ServiceError, model::SamplingParams};

/// Picks the next token id from `logits`.
///
/// Greedy when `do_sample` is off, otherwise temperature-scaled nucleus
/// sampling. Non-finite logits never win.
pub fn next_token<R: Rng + ?Sized>(
    logits: &[f32],
    params: &SamplingParams,
    rng: &mut R,
) -> Result<u32, ServiceError> {
    if !params.do_sample {
        return argmax(logits)
            .ok_or_else(|| ServiceError::Inference("model produced no finite logits".into()));
    }

    let probs = softmax(logits, params.temperature)
        .ok_or_else(|| ServiceError::Inference("model produced no finite logits".into()))?;
    let nucleus = nucleus(&probs, params.top_p);

    let total: f64 = nucleus.iter().map(|&(_, p)| p).sum();
    let mut draw = rng.gen_range(0.0..total);
    for &(token, p) in &nucleus {
        if draw < p {
            return Ok(token as u32);
        }
        draw -= p;
    }
    // Rounding can leave `draw` marginally above the final bucket.
    Ok(nucleus[nucleus.len() - 1].0 as u32)
}

pub fn argmax(logits: &[f32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx as u32)
}

/// Temperature-scaled softmax. Non-finite entries get zero probability.
fn softmax(logits: &[f32], temperature: f64) -> Option<Vec<f64>> {
    let temperature = temperature.max(f64::EPSILON);
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .max_by(|a, b| a.total_cmp(b))? as f64;

    let mut probs: Vec<f64> = logits
        .iter()
        .map(|&v| {
            if v.is_finite() {
                ((v as f64 - max) / temperature).exp()
            } else {
                0.0
            }
        })
        .collect();
    let sum: f64 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }
    Some(probs)
}

/// Smallest prefix of tokens, by descending probability, whose mass reaches
/// `top_p`. Always holds at least one token.
fn nucleus(probs: &[f64], top_p: f64) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = probs
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, p)| p > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut cumulative = 0.0;
    let mut keep = 0;
    for &(_, p) in &ranked {
        cumulative += p;
        keep += 1;
        if cumulative >= top_p {
            break;
        }
    }
    ranked.truncate(keep.max(1));
    ranked
}
