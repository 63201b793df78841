use itertools::Itertools;

/// Collapses every run of whitespace to a single space and trims the ends.
///
/// Generated SQL is written for readability, with indentation and line
/// breaks; tests compare it modulo whitespace using this.
pub fn crunch_whitespace(s: &str) -> String {
    s.split_whitespace().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crunches() {
        assert_eq!(crunch_whitespace("  a \n\t b  c "), "a b c");
        assert_eq!(crunch_whitespace(""), "");
        assert_eq!(crunch_whitespace("x"), "x");
    }
}
