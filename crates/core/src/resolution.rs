//! Output dimension normalisation.
//!
//! The video model works on latent tiles, so requested widths and
//! heights are snapped to the nearest multiple of
//! [`DIMENSION_MULTIPLE`] before they reach the graph.

use crate::error::CoreError;

/// Every output dimension is a multiple of this value.
pub const DIMENSION_MULTIPLE: u32 = 16;

/// Round `value` to the nearest multiple of [`DIMENSION_MULTIPLE`],
/// never going below one multiple.
///
/// Halfway cases round to the even multiplier (`8 -> 0 -> 16`,
/// `24 -> 32`, `40 -> 32`), matching banker's rounding of `value / 16`.
pub fn round_to_multiple_of_16(value: f64) -> Result<u32, CoreError> {
    if !value.is_finite() {
        return Err(CoreError::Validation(format!(
            "width/height value is not a finite number: {value}"
        )));
    }

    let multiple = f64::from(DIMENSION_MULTIPLE);
    let adjusted = (value / multiple).round_ties_even() * multiple;

    if adjusted < multiple {
        return Ok(DIMENSION_MULTIPLE);
    }
    Ok(adjusted.min(f64::from(u32::MAX)) as u32)
}

/// Interpret a raw JSON dimension as a number.
///
/// Accepts JSON numbers and numeric strings (`"512"`, `" 480.0 "`).
pub fn parse_dimension(value: &serde_json::Value) -> Result<f64, CoreError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        CoreError::Validation(format!("width/height value is not a number: {value}"))
    })
}

/// Parse and round a raw JSON dimension in one step.
pub fn normalize_dimension(value: &serde_json::Value) -> Result<u32, CoreError> {
    round_to_multiple_of_16(parse_dimension(value)?)
}
