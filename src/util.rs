//! Small string helpers shared by the parser, the scheduler and the session layer.

/// Deterministic id for titles: lowercase ASCII alphanumerics, every other run of
/// characters collapsed into one hyphen, no leading/trailing hyphen.
///
/// `"Time-To-Live (TTL)"` becomes `"time-to-live-ttl"`.
pub fn slugify(title: &str) -> String {
  let mut out = String::with_capacity(title.len());
  let mut pending_hyphen = false;
  for ch in title.chars() {
    if ch.is_ascii_alphanumeric() {
      if pending_hyphen && !out.is_empty() {
        out.push('-');
      }
      pending_hyphen = false;
      out.push(ch.to_ascii_lowercase());
    } else {
      pending_hyphen = true;
    }
  }
  out
}

/// Split a comma-separated directive value, trimming entries and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// Case-insensitive, whitespace-trimmed comparison key for free-text answers.
pub fn normalize_answer(s: &str) -> String {
  s.trim().to_lowercase()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with whole content lines or long answers.
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
