//! Post-draft human-like delay (§4.J.12, "sampleHumanDelayMs"). Sampled
//! after a draft is produced and before it's committed, with the per-chat
//! lock released for the duration (§5: "No task may hold a per-chat lock
//! while awaiting the human-like delay").

use amicus_core::config::DelayConfig;
use rand::Rng;

/// What's being delayed — shapes which branch of §4.J.12's formula applies.
#[derive(Debug, Clone, Copy)]
pub enum DelayKind {
    React,
    SendText { text_len: usize },
}

/// `sampleHumanDelayMs({minMs, maxMs, kind, textLen, isQuestion})`:
/// - `react` → uniform in `[min, min + (max-min)/3]`.
/// - `send_text` → baseline (`min`) + `textLen * msPerChar` + Gaussian
///   jitter, ×0.8 if the triggering message was a question, clipped to
///   `[min, max]`.
pub fn sample_human_delay_ms(cfg: &DelayConfig, kind: DelayKind, is_question: bool) -> u64 {
    match kind {
        DelayKind::React => {
            let span = cfg.max_ms.saturating_sub(cfg.min_ms) / 3;
            let upper = cfg.min_ms + span;
            if upper <= cfg.min_ms {
                cfg.min_ms
            } else {
                rand::thread_rng().gen_range(cfg.min_ms..=upper)
            }
        }
        DelayKind::SendText { text_len } => {
            let baseline = cfg.min_ms as f64 + (text_len as f64 * cfg.ms_per_char as f64);
            let mut delay = baseline + gaussian_jitter(cfg.jitter_std_ms);
            if is_question {
                delay *= 0.8;
            }
            delay.clamp(cfg.min_ms as f64, cfg.max_ms as f64).round() as u64
        }
    }
}

/// Box-Muller transform over `rand`'s own uniform sampler — no need for a
/// dedicated normal-distribution crate for a single jitter term.
fn gaussian_jitter(std_dev: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    let z0 = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    z0 * std_dev
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DelayConfig {
        DelayConfig {
            min_ms: 700,
            max_ms: 6_000,
            ms_per_char: 35,
            jitter_std_ms: 500.0,
        }
    }

    #[test]
    fn react_delay_stays_within_the_lower_third_of_the_range() {
        let cfg = cfg();
        let upper = cfg.min_ms + (cfg.max_ms - cfg.min_ms) / 3;
        for _ in 0..200 {
            let ms = sample_human_delay_ms(&cfg, DelayKind::React, false);
            assert!(ms >= cfg.min_ms && ms <= upper, "react delay {ms} out of [{}, {upper}]", cfg.min_ms);
        }
    }

    #[test]
    fn send_text_delay_is_clipped_to_configured_bounds() {
        let cfg = cfg();
        for len in [0usize, 50, 500, 5_000] {
            for _ in 0..50 {
                let ms = sample_human_delay_ms(&cfg, DelayKind::SendText { text_len: len }, false);
                assert!(ms >= cfg.min_ms && ms <= cfg.max_ms, "send_text delay {ms} out of bounds");
            }
        }
    }

    #[test]
    fn question_replies_are_scaled_down_on_average() {
        let cfg = cfg();
        let text_len = 50;
        let n = 400;
        let sum_question: u64 = (0..n)
            .map(|_| sample_human_delay_ms(&cfg, DelayKind::SendText { text_len }, true))
            .sum();
        let sum_plain: u64 = (0..n)
            .map(|_| sample_human_delay_ms(&cfg, DelayKind::SendText { text_len }, false))
            .sum();
        assert!(
            (sum_question as f64) < (sum_plain as f64),
            "question-triggered delays should average lower: question={sum_question} plain={sum_plain}"
        );
    }
}
