//! Parsing of masscan's console output and JSON report.

use portwatch_core::RawResult;

/// Extract the `found=N` count from masscan's final status line.
///
/// The last status line looks like:
/// `rate:  0.00-kpps, 100.00% done, waiting -30-secs, found=2`
pub fn found_count(output: &str) -> Option<u64> {
    let idx = output.rfind("found=")?;
    let digits: String = output[idx + "found=".len()..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Decode the JSON report file. An empty file has no results.
pub fn parse_report(contents: &[u8]) -> serde_json::Result<Vec<RawResult>> {
    if contents.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(contents)
}
