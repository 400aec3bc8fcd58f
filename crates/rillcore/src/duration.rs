use crate::error::ExpressionError;
use std::time::Duration;

/// Parse a duration attribute such as `"1s"`, `"10m"`, `"1m30s"` or `"250ms"`.
///
/// A bare number is seconds (`"2"`, `"0.5"`). Units: `ms`, `s`, `m`, `h`, `d`.
pub fn parse_duration(text: &str) -> Result<Duration, ExpressionError> {
    let s = text.trim();
    if s.is_empty() {
        return Err(ExpressionError::InvalidDuration(text.to_string()));
    }

    let mut total_ms: f64 = 0.0;
    let mut chars = s.char_indices().peekable();

    while chars.peek().is_some() {
        let num_start = chars.peek().map(|(i, _)| *i).unwrap_or(s.len());
        while let Some((_, c)) = chars.peek() {
            if c.is_ascii_digit() || *c == '.' {
                chars.next();
            } else {
                break;
            }
        }
        let num_end = chars.peek().map(|(i, _)| *i).unwrap_or(s.len());
        let number: f64 = s[num_start..num_end]
            .parse()
            .map_err(|_| ExpressionError::InvalidDuration(text.to_string()))?;

        let unit_start = num_end;
        while let Some((_, c)) = chars.peek() {
            if c.is_ascii_alphabetic() {
                chars.next();
            } else {
                break;
            }
        }
        let unit_end = chars.peek().map(|(i, _)| *i).unwrap_or(s.len());

        let factor = match &s[unit_start..unit_end] {
            "" | "s" => 1_000.0,
            "ms" => 1.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            "d" => 86_400_000.0,
            _ => return Err(ExpressionError::InvalidDuration(text.to_string())),
        };
        total_ms += number * factor;
    }

    Ok(Duration::from_millis(total_ms.round() as u64))
}
