//! Echo protocol line framing.
//!
//! A line is the shortest prefix of the buffered bytes that ends with the
//! terminator byte. No encoding is assumed and there is no length limit.

/// Length of the first complete line in `input`, terminator included.
///
/// Returns `None` if `input` holds no terminator yet.
pub fn find_line(input: &[u8], terminator: u8) -> Option<usize> {
    input
        .iter()
        .position(|&b| b == terminator)
        .map(|pos| pos + 1)
}
