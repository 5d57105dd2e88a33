pub mod env;
pub mod telemetry;

/// Compares two tokens without short-circuiting on the first mismatched byte.
///
/// Used for the internal API token; the length check still leaks the expected length, which is
/// acceptable for a static shared secret.
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (l, r)| {
            acc | (std::hint::black_box(*l) ^ std::hint::black_box(*r))
        });

    std::hint::black_box(diff) == 0
}

/// Truncates `text` to at most `max` bytes without splitting a UTF-8 sequence.
pub fn truncate_on_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    &text[..end]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_constant_time_cmp() {
        let token = "internal-token";
        assert!(constant_time_cmp(token, "internal-token"));
        assert!(constant_time_cmp("", ""));

        // every single-byte flip must survive the fold, wherever it sits
        for i in 0..token.len() {
            let mut flipped = token.as_bytes().to_vec();
            flipped[i] ^= 0x01;
            let flipped = String::from_utf8(flipped).unwrap();
            assert!(!constant_time_cmp(token, &flipped), "mismatch at byte {i} not detected");
        }

        assert!(!constant_time_cmp(token, "internal-toke"));
        assert!(!constant_time_cmp(token, "internal-token!"));
    }

    #[test]
    fn test_truncate_on_boundary() {
        assert_eq!(truncate_on_boundary("hello", 10), "hello");
        assert_eq!(truncate_on_boundary("hello", 3), "hel");
        // 'é' is two bytes; cutting through it backs off to the previous boundary
        assert_eq!(truncate_on_boundary("caé", 3), "ca");
    }
}
