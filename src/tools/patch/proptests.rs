//! Property-based tests for unified-diff application
//!
//! Diffs produced by an independent implementation must turn the old
//! text into the new text exactly, including a missing final newline.

use super::*;
use proptest::prelude::*;
use similar::TextDiff;

/// Short lines from a small alphabet so diffs share plenty of context
fn arb_text() -> impl Strategy<Value = String> {
    (prop::collection::vec("[abc ]{0,3}", 0..12), any::<bool>()).prop_map(|(lines, trailing)| {
        let mut text = lines.join("\n");
        if trailing && !text.is_empty() {
            text.push('\n');
        }
        text
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_generated_diff_applies(old in arb_text(), new in arb_text()) {
        prop_assume!(old != new);
        let patch = TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header("a/file", "b/file")
            .to_string();
        prop_assert_eq!(apply_unified_diff(&old, &patch).unwrap(), new);
    }

    #[test]
    fn prop_identity_context_only(old in arb_text()) {
        let patch = TextDiff::from_lines(&old, &old)
            .unified_diff()
            .header("a/file", "b/file")
            .to_string();
        // No changes means no hunks
        prop_assert_eq!(apply_unified_diff(&old, &patch), Err(PatchError::NoHunks));
    }
}
