/// Splits `text` into tokens on any character found in `delimiters`.
///
/// The scan is done per `char`, so multi-byte delimiters and tokens are
/// handled correctly.
///
/// # Notes
/// - Runs of delimiters collapse into a single split point.
/// - Leading and trailing delimiters never produce empty tokens.
/// - Token order follows the input.
pub fn split(text: &str, delimiters: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	let mut current = String::new();

	for c in text.chars() {
		if !delimiters.contains(c) {
			current.push(c);
			continue;
		}
		if !current.is_empty() {
			tokens.push(std::mem::take(&mut current));
		}
	}

	if !current.is_empty() {
		tokens.push(current);
	}
	tokens
}
