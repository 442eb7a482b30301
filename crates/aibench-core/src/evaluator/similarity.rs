//! Textual similarity of two files.
//!
//! The score is the line-level LCS ratio `2·LCS / (|a| + |b|)`, in `[0, 1]`.

use std::collections::HashMap;

/// Largest `|a|·|b|` for which the exact LCS is computed. Beyond it the
/// score falls back to multiset line overlap, an upper bound of the LCS.
pub const LCS_CELL_BUDGET: usize = 4_000_000;

/// Similarity of two byte strings. Identical input scores exactly 1.0.
pub fn file_similarity(a: &[u8], b: &[u8]) -> f64 {
    if a == b {
        return 1.0;
    }
    let a = String::from_utf8_lossy(a);
    let b = String::from_utf8_lossy(b);
    let lines_a: Vec<&str> = a.lines().collect();
    let lines_b: Vec<&str> = b.lines().collect();
    line_similarity(&lines_a, &lines_b)
}

/// `2·common / (|a| + |b|)` over lines; two empty inputs score 1.0.
pub fn line_similarity(a: &[&str], b: &[&str]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let common = if a.len().saturating_mul(b.len()) <= LCS_CELL_BUDGET {
        lcs_len(a, b)
    } else {
        multiset_overlap(a, b)
    };
    (2 * common) as f64 / total as f64
}

/// Length of the longest common subsequence, two-row DP.
fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for line_a in a {
        for (j, line_b) in b.iter().enumerate() {
            curr[j + 1] = if line_a == line_b {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Lines shared by `a` and `b`, counting duplicates, ignoring order.
fn multiset_overlap(a: &[&str], b: &[&str]) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in a {
        *counts.entry(line).or_insert(0) += 1;
    }
    let mut shared = 0;
    for line in b {
        if let Some(n) = counts.get_mut(line) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    shared
}
