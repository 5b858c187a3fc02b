//! Human ordering for file and folder names: "file2" sorts before "file10".

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn chunker() -> &'static Regex {
    static CHUNKER: OnceLock<Regex> = OnceLock::new();
    CHUNKER.get_or_init(|| Regex::new(r"[0-9]+|[^0-9]+").expect("static pattern is valid"))
}

fn runs(s: &str) -> Vec<&str> {
    chunker().find_iter(s).map(|m| m.as_str()).collect()
}

fn is_numeric(run: &str) -> bool {
    run.bytes().all(|b| b.is_ascii_digit())
}

/// Compares two digit runs by value without parsing, so arbitrarily long runs never overflow.
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_runs(a: &[&str], b: &[&str]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = if is_numeric(x) && is_numeric(y) {
            cmp_numeric(x, y)
        } else {
            x.to_lowercase().cmp(&y.to_lowercase())
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Natural comparison of two names.
///
/// Names are split into alternating digit and non-digit runs. Digit runs compare
/// by numeric value, other runs case-insensitively, and when every compared run
/// is equal the name with fewer runs sorts first. Names that are still equal
/// (`"a.mp4"` vs `"A.mp4"`, `"01"` vs `"1"`) fall back to byte order, so the
/// result is `Equal` only for identical strings.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    cmp_runs(&runs(a), &runs(b)).then_with(|| a.cmp(b))
}

pub fn natural_less(a: &str, b: &str) -> bool {
    natural_cmp(a, b) == Ordering::Less
}

/// Owned sort key wrapper for use with `sort_by_key` and ordered collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey(pub String);

impl Ord for NaturalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.0, &other.0)
    }
}

impl PartialOrd for NaturalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
