/// Strips C0 control characters except tab, newline, and carriage return.
pub fn sanitize_text(raw: &str) -> String {
	raw.chars()
		.filter(|c| !matches!(*c as u32, 0x00..=0x1F) || matches!(c, '\t' | '\n' | '\r'))
		.collect()
}

/// Char-based truncation; never splits a code point.
pub fn truncate_chars(raw: &str, max_chars: usize) -> String {
	if raw.chars().count() <= max_chars {
		return raw.to_string();
	}

	raw.chars().take(max_chars).collect()
}
