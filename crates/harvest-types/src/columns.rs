//! A1-style column letters.
//!
//! Columns are 1-based: `A` is 1, `Z` is 26, `AA` is 27.

/// Parse column letters (case-insensitive) into a 1-based index.
///
/// Returns `None` for empty input, non-letters, or indices beyond `u32`.
pub fn column_index(letters: &str) -> Option<u32> {
    let letters = letters.trim();
    if letters.is_empty() {
        return None;
    }

    let mut index: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index)
}

/// Render a 1-based column index as letters. Index 0 renders as an empty string.
pub fn column_letters(mut index: u32) -> String {
    let mut out = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        out.push((b'A' + rem as u8) as char);
        index = (index - 1) / 26;
    }
    out.iter().rev().collect()
}
