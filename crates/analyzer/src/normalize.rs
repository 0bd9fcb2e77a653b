use serde_json::Value;

pub const NEUTRAL_SCORE: f64 = 50.0;
pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Coerce whatever the model put in `score` into `[0, 100]`.
///
/// Numbers and numeric strings are clamped, and booleans count as 1 or 0.
/// Anything else (including `NaN`) becomes [`NEUTRAL_SCORE`].
pub fn normalize_score(raw: &Value) -> f64 {
    let parsed = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    };

    match parsed {
        Some(value) if !value.is_nan() => value.clamp(MIN_SCORE, MAX_SCORE),
        _ => NEUTRAL_SCORE,
    }
}
