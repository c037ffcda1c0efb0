//! String formatting utilities.

/// Shortens a transaction hash for log lines.
///
/// Shows the first 8 characters followed by ".." for longer strings.
pub fn truncate_hash(hash: &str) -> String {
	match hash.get(..8) {
		Some(prefix) if hash.len() > 8 => format!("{}..", prefix),
		_ => hash.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_hash() {
		assert_eq!(truncate_hash("ABCDEF"), "ABCDEF");
		assert_eq!(truncate_hash("0123456789ABCDEF"), "01234567..");
	}
}
