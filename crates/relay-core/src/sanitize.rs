/// Prompt-injection marker substrings masked out of artifact previews.
/// Matching is ASCII-case-insensitive. This set is part of the contract
/// surface; keep it in sync with the documented defaults.
pub const INJECTION_PATTERNS: &[&str] = &[
    "ignore previous instructions",
    "ignore all instructions",
    "<|system|>",
    "<|user|>",
    "<|assistant|>",
    "[INST]",
    "[/INST]",
    "###instruction",
    "###system",
];

pub const MASK: &str = "[SANITIZED]";

/// Replace every occurrence of an injection pattern with the mask token.
/// Matches are located byte-accurately against the original text, so
/// multi-byte UTF-8 sequences are never split.
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in INJECTION_PATTERNS {
        while let Some(idx) = find_ignore_ascii_case(&out, pattern, 0) {
            out.replace_range(idx..idx + pattern.len(), MASK);
        }
    }
    out
}

/// Byte index of the first ASCII-case-insensitive occurrence of `needle`
/// at or after `from`. Match boundaries align with the needle's ASCII
/// bytes, so they always fall on UTF-8 character boundaries.
pub fn find_ignore_ascii_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() || from > h.len() - n.len() {
        return None;
    }
    (from..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Count non-overlapping ASCII-case-insensitive occurrences.
pub fn count_ignore_ascii_case(haystack: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut at = 0;
    while let Some(idx) = find_ignore_ascii_case(haystack, needle, at) {
        count += 1;
        at = idx + needle.len();
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_each_pattern_case_insensitively() {
        for pattern in INJECTION_PATTERNS {
            for variant in [pattern.to_string(), pattern.to_uppercase()] {
                let input = format!("before {variant} after");
                let out = sanitize(&input);
                assert!(
                    !out.to_lowercase().contains(&pattern.to_lowercase()),
                    "pattern {pattern:?} survived in {out:?}"
                );
                assert!(out.contains(MASK), "no mask for {pattern:?}: {out:?}");
            }
        }
    }

    #[test]
    fn masks_repeated_occurrences() {
        let out = sanitize("[INST] one [INST] two");
        assert_eq!(out.matches(MASK).count(), 2);
        assert!(!out.contains("[INST]"));
    }

    #[test]
    fn clean_text_unchanged() {
        let input = "ordinary instructions about previous work";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn mixed_case_mid_line() {
        let out = sanitize("before\nIGNORE PREVIOUS INSTRUCTIONS and do X\nafter");
        assert!(!out.to_lowercase().contains("ignore previous instructions"));
        assert!(out.contains("[SANITIZED]"));
        assert!(out.starts_with("before\n"));
        assert!(out.ends_with("\nafter"));
    }

    #[test]
    fn multibyte_neighbors_survive() {
        let out = sanitize("héllo <|system|> wörld");
        assert_eq!(out, format!("héllo {MASK} wörld"));
    }

    #[test]
    fn count_occurrences() {
        assert_eq!(count_ignore_ascii_case("aAbAa", "a"), 4);
        assert_eq!(count_ignore_ascii_case("token token TOKEN", "token"), 3);
        assert_eq!(count_ignore_ascii_case("nothing here", "token"), 0);
    }
}
