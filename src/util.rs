//! Small utility helpers used across modules.

/// Convert a byte offset into a UTF-16 code unit offset.
/// Browser inputs and JS strings index by UTF-16, the engine by UTF-8 bytes.
pub fn utf16_offset(s: &str, byte: usize) -> usize {
  let byte = byte.min(s.len());
  s.char_indices()
    .take_while(|(i, _)| *i < byte)
    .map(|(_, c)| c.len_utf16())
    .sum()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with whole lesson texts.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn utf16_offsets() {
    assert_eq!(utf16_offset("abc", 2), 2);
    assert_eq!(utf16_offset("é!", 2), 1);
    assert_eq!(utf16_offset("😀x", 4), 2);
    assert_eq!(utf16_offset("ab", 99), 2);
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 10), "short");
    assert_eq!(trunc_for_log("héllo", 2), "h… (6 bytes total)");
  }
}
