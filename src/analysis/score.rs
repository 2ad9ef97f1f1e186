//! Composite quality score.
//!
//! Combines the metrics backend's blur, technical-quality and aesthetic
//! readings with an emotion valence into a single 0-100 number.

/// Blur values below this floor scale the whole score down proportionally.
/// Shallow depth-of-field shots typically read 50-150, so they are unaffected.
pub const BLUR_FLOOR: f64 = 30.0;

pub const AESTHETIC_WEIGHT: f64 = 0.60;
pub const QUALITY_WEIGHT: f64 = 0.30;
pub const EMOTION_WEIGHT: f64 = 0.10;

/// Aesthetic predictions are on a 1-10 scale.
const AESTHETIC_MIN: f64 = 1.0;
const AESTHETIC_SPAN: f64 = 9.0;

/// Technical defect score, lower is better.
const QUALITY_SCALE: f64 = 100.0;

/// Neutral emotion contribution used when no face was detected.
const NEUTRAL_EMOTION: f64 = 0.5;

/// Multiplier applied for blur: linear below the floor, 1.0 at or above it.
pub fn blur_gate(blur: f64) -> f64 {
    if blur < BLUR_FLOOR {
        blur.max(0.0) / BLUR_FLOOR
    } else {
        1.0
    }
}

/// Compute the composite score, rounded to one decimal.
pub fn composite(blur: f64, aesthetic: f64, technical_quality: f64, emotion_valence: Option<f64>) -> f64 {
    let aesthetic_norm = ((aesthetic - AESTHETIC_MIN) / AESTHETIC_SPAN).clamp(0.0, 1.0);
    let quality_norm = (1.0 - technical_quality / QUALITY_SCALE).clamp(0.0, 1.0);
    let emotion_norm = match emotion_valence {
        Some(valence) => ((valence + 1.0) / 2.0).clamp(0.0, 1.0),
        None => NEUTRAL_EMOTION,
    };

    let weighted = aesthetic_norm * AESTHETIC_WEIGHT
        + quality_norm * QUALITY_WEIGHT
        + emotion_norm * EMOTION_WEIGHT;

    round1(blur_gate(blur) * weighted * 100.0)
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_floor_blur_worst_metrics_leaves_only_neutral_emotion() {
        // aesthetic 1 and quality 100 normalize to zero; neutral emotion adds 0.05
        assert!(approx(composite(30.0, 1.0, 100.0, None), 5.0));
    }

    #[test]
    fn test_sharp_best_metrics() {
        assert!(approx(composite(150.0, 10.0, 0.0, None), 95.0));
        assert!(approx(composite(150.0, 10.0, 0.0, Some(1.0)), 100.0));
        assert!(approx(composite(150.0, 10.0, 0.0, Some(-1.0)), 90.0));
    }

    #[test]
    fn test_blur_gate_scales_below_floor() {
        assert!(approx(blur_gate(15.0), 0.5));
        assert!(approx(blur_gate(0.0), 0.0));
        assert!(approx(blur_gate(-4.0), 0.0));
        assert!(approx(blur_gate(30.0), 1.0));
        assert!(approx(blur_gate(500.0), 1.0));

        let sharp = composite(100.0, 7.0, 20.0, Some(0.4));
        let soft = composite(15.0, 7.0, 20.0, Some(0.4));
        assert!((soft - round1(sharp / 2.0)).abs() <= 0.1);
    }

    #[test]
    fn test_hand_computed_case() {
        // aesthetic (5.5-1)/9 = 0.5, quality 1-40/100 = 0.6, emotion (0.2+1)/2 = 0.6
        // 0.5*0.6 + 0.6*0.3 + 0.6*0.1 = 0.54 -> 54.0
        assert!(approx(composite(80.0, 5.5, 40.0, Some(0.2)), 54.0));
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        let score = composite(200.0, 14.0, -30.0, Some(3.0));
        assert!(approx(score, 100.0));
        let score = composite(200.0, -2.0, 180.0, Some(-3.0));
        assert!(approx(score, 0.0));
    }

    #[test]
    fn test_result_has_one_decimal() {
        let score = composite(42.0, 6.37, 33.3, Some(0.13));
        assert!(approx(score, round1(score)));
        assert!((0.0..=100.0).contains(&score));
    }
}
