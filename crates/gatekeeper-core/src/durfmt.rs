//! Minimal Go-style duration string parsing ("5m", "1h", "2m30s", "300ms").

use std::time::Duration;

#[derive(Debug)]
pub struct ParseError(String);

impl std::fmt::Display for ParseError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "invalid duration string: {:?}", self.0)
	}
}
impl std::error::Error for ParseError {}

pub fn parse(s: &str) -> Result<Duration, ParseError> {
	let s = s.trim();
	if s.is_empty() {
		return Err(ParseError(s.to_string()));
	}
	let bytes = s.as_bytes();
	let mut total = Duration::ZERO;
	let mut i = 0usize;
	let mut saw_any = false;
	while i < bytes.len() {
		let start = i;
		if bytes[i] == b'-' {
			// negative durations are not supported
			return Err(ParseError(s.to_string()));
		}
		while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
			i += 1;
		}
		if i == start {
			return Err(ParseError(s.to_string()));
		}
		let num: f64 = s[start..i].parse().map_err(|_| ParseError(s.to_string()))?;
		let unit_start = i;
		while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
			i += 1;
		}
		let unit = &s[unit_start..i];
		let unit_secs = match unit {
			"ms" => 0.001,
			"s" => 1.0,
			"m" => 60.0,
			"h" => 3600.0,
			_ => return Err(ParseError(s.to_string())),
		};
		total += Duration::from_secs_f64(num * unit_secs);
		saw_any = true;
	}
	if !saw_any {
		return Err(ParseError(s.to_string()));
	}
	Ok(total)
}
