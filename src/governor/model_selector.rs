//! Adaptive model selection for GPU transcription workloads.
//!
//! Given the VRAM actually available, picks the transcription model,
//! batch size, diarization toggle, and task concurrency. Degradation
//! order under pressure:
//!
//! 1. Drop concurrency (go sequential) before reducing quality.
//! 2. Reduce model size (large → medium → small → base → tiny).
//! 3. Disable diarization only as last resort.

use serde::{Deserialize, Serialize};

/// Model classes by rising VRAM demand, with their requirement in GB.
const MODEL_VRAM: [(&str, f64); 5] = [
    ("tiny", 1.0),
    ("base", 2.0),
    ("small", 3.0),
    ("medium", 5.0),
    ("large", 10.0),
];

/// Diarization costs roughly 3-4 GB on top of the ASR model.
const DIARIZATION_VRAM: f64 = 4.0;

/// VRAM kept free for everything else on the device.
const RESERVE_VRAM: f64 = 1.0;

/// Concurrency is capped regardless of how much VRAM is free.
const MAX_CONCURRENCY: u32 = 4;

/// Input to the selector.
#[derive(Debug, Clone)]
pub struct SelectorInput {
    /// VRAM available on the device, in GB.
    pub vram_gb: f64,
    /// Requested model, or `"auto"` to pick by VRAM.
    pub requested_model: String,
    /// Whether speaker diarization was requested.
    pub enable_diarization: bool,
}

/// Selected transcription setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Chosen model class.
    pub model: String,
    /// Batch size for the chosen model at this VRAM level.
    pub batch_size: u32,
    /// Whether diarization survived the budget.
    pub enable_diarization: bool,
    /// Parallel tasks the device can sustain.
    pub max_concurrency: u32,
    /// Human-readable explanation of the choice.
    pub reason: String,
}

fn model_vram(model: &str) -> f64 {
    MODEL_VRAM
        .iter()
        .find(|(name, _)| *name == model)
        .map_or(3.0, |(_, vram)| *vram)
}

/// Picks the largest model that fits the usable VRAM, honoring an
/// explicit user preference.
fn auto_select_model(vram_gb: f64, requested: &str) -> String {
    if requested != "auto" {
        return requested.to_string();
    }
    let usable = vram_gb - RESERVE_VRAM;
    let picked = MODEL_VRAM
        .iter()
        .rev()
        .find(|(_, vram)| *vram <= usable)
        .map_or("tiny", |(name, _)| *name);
    picked.to_string()
}

/// Batch size steps with VRAM bands, starting from a per-model base.
fn batch_size(vram_gb: f64, model: &str) -> u32 {
    let base = match model {
        "tiny" => 32,
        "base" => 24,
        "medium" => 12,
        "large" => 8,
        _ => 16,
    };
    if vram_gb < 4.0 {
        (base / 4).max(4)
    } else if vram_gb < 6.0 {
        (base / 2).max(8)
    } else if vram_gb < 10.0 {
        base
    } else {
        (base * 2).min(32)
    }
}

/// Computes the optimal transcription setup for the available VRAM.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn select_transcription_setup(input: &SelectorInput) -> ModelSelection {
    let vram = input.vram_gb;
    let model = auto_select_model(vram, &input.requested_model);
    let usable = vram - RESERVE_VRAM;

    let per_task = |m: &str, diarize: bool| {
        model_vram(m) + if diarize { DIARIZATION_VRAM } else { 0.0 }
    };

    let single_task = per_task(&model, input.enable_diarization);

    // Enough headroom for parallel tasks.
    if single_task * 2.0 <= usable {
        let concurrency = ((vram / single_task) as u32).clamp(1, MAX_CONCURRENCY);
        return ModelSelection {
            batch_size: batch_size(vram, &model),
            enable_diarization: input.enable_diarization,
            max_concurrency: concurrency,
            reason: format!("sufficient VRAM for {concurrency} parallel tasks"),
            model,
        };
    }

    // Sequential, but the requested setup fits.
    if single_task <= usable {
        return ModelSelection {
            batch_size: batch_size(vram, &model),
            enable_diarization: input.enable_diarization,
            max_concurrency: 1,
            reason: format!(
                "sequential processing required ({vram:.1}GB VRAM, {single_task:.1}GB per task)"
            ),
            model,
        };
    }

    // Step down model sizes before touching diarization.
    for &(smaller, _) in MODEL_VRAM
        .iter()
        .rev()
        .skip_while(|(name, _)| *name != model.as_str())
        .skip(1)
    {
        if per_task(smaller, input.enable_diarization) <= usable {
            return ModelSelection {
                model: smaller.to_string(),
                batch_size: batch_size(vram, smaller),
                enable_diarization: input.enable_diarization,
                max_concurrency: 1,
                reason: format!("reduced model to '{smaller}' to fit in {vram:.1}GB VRAM"),
            };
        }
    }

    if input.enable_diarization {
        // Last resort: keep the smallest model, drop diarization.
        let fallback = auto_select_model(vram, "auto");
        return ModelSelection {
            batch_size: batch_size(vram, &fallback),
            model: fallback,
            enable_diarization: false,
            max_concurrency: 1,
            reason: format!(
                "disabled diarization: insufficient VRAM ({vram:.1}GB) even with smallest model"
            ),
        };
    }

    ModelSelection {
        model: "tiny".to_string(),
        batch_size: batch_size(vram, "tiny"),
        enable_diarization: false,
        max_concurrency: 1,
        reason: format!("minimum setup for {vram:.1}GB VRAM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn input(vram_gb: f64, diarize: bool) -> SelectorInput {
        SelectorInput {
            vram_gb,
            requested_model: "auto".to_string(),
            enable_diarization: diarize,
        }
    }

    #[test]
    fn test_big_gpu_runs_parallel() {
        let s = select_transcription_setup(&input(24.0, true));
        assert_eq!(s.model, "large");
        assert!(s.enable_diarization);
        assert!(s.max_concurrency >= 1);
        assert!(s.max_concurrency <= 4);
    }

    #[test]
    fn test_concurrency_capped_at_four() {
        let s = select_transcription_setup(&input(64.0, false));
        assert_eq!(s.max_concurrency, 4);
    }

    #[test]
    fn test_mid_gpu_goes_sequential_before_downgrading() {
        // 8GB usable=7: medium(5)+diarization(4)=9 does not fit, but
        // small(3)+4=7 does, so the model steps down with diarization
        // kept.
        let s = select_transcription_setup(&input(8.0, true));
        assert!(s.enable_diarization);
        assert_eq!(s.max_concurrency, 1);
        assert_eq!(s.model, "small");
    }

    #[test]
    fn test_tiny_gpu_drops_diarization_last() {
        let s = select_transcription_setup(&input(3.0, true));
        assert!(!s.enable_diarization, "diarization must be sacrificed last, but sacrificed");
        assert_eq!(s.max_concurrency, 1);
    }

    #[test]
    fn test_user_preference_respected() {
        let s = select_transcription_setup(&SelectorInput {
            vram_gb: 24.0,
            requested_model: "base".to_string(),
            enable_diarization: false,
        });
        assert_eq!(s.model, "base");
    }

    #[test_case(2.0, 4; "low vram quarters the batch")]
    #[test_case(5.0, 8; "mid vram halves the batch")]
    #[test_case(8.0, 16; "base band keeps the batch")]
    #[test_case(16.0, 32; "high vram doubles the batch")]
    fn test_batch_size_bands(vram: f64, expected: u32) {
        assert_eq!(batch_size(vram, "small"), expected);
    }

    #[test]
    fn test_selection_has_reason() {
        let s = select_transcription_setup(&input(12.0, true));
        assert!(!s.reason.is_empty());
    }
}
