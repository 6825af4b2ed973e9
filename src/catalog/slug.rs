/// Canonicalize a technology/rule name into a slug.
///
/// Lowercase, replace every run of characters outside `[a-z0-9-]` with a
/// single `-`, then trim leading/trailing `-`. Idempotent: `slug(slug(x))
/// == slug(x)`, and the result matches `^[a-z0-9]+(-[a-z0-9]+)*$` for any
/// non-empty input that contains at least one alphanumeric character.
pub fn slug(input: &str) -> String {
    let lowered = input.to_ascii_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut prev_dash = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(slug("Next.js"), "next-js");
        assert_eq!(slug("  Some  Weird__Name!! "), "some-weird-name");
        assert_eq!(slug("jQuery UI"), "jquery-ui");
    }

    #[test]
    fn idempotent() {
        for input in ["Next.js", "A B C", "already-slugged", "___"] {
            let once = slug(input);
            let twice = slug(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn matches_expected_shape_for_nonempty_alnum_input() {
        let re = regex::Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap();
        for input in ["Next.js", "jQuery UI", "PHP", "Google Analytics"] {
            let s = slug(input);
            assert!(re.is_match(&s), "{s:?} does not match expected shape");
        }
    }
}
