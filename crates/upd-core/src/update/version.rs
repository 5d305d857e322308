//! Permissive ordering of dotted version strings.
//!
//! Components are compared numerically left to right. Missing trailing
//! components count as `0`, so `1.2` equals `1.2.0`. Components that do not
//! parse as integers also count as `0`; comparison never fails.

use std::cmp::Ordering;

fn components(version: &str) -> Vec<u64> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}

/// Compare two version strings.
pub fn compare(a: &str, b: &str) -> Ordering {
    let a = components(a);
    let b = components(b);
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// `compare` as the classic `-1 / 0 / 1` integer.
pub fn compare_sign(a: &str, b: &str) -> i8 {
    match compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// True when `candidate` is strictly older than `current`.
///
/// Equal versions are a reinstall, not a downgrade.
pub fn is_downgrade(current: &str, candidate: &str) -> bool {
    compare(candidate, current) == Ordering::Less
}
