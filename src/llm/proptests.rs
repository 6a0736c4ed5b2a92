//! Property-based tests for stream decoding
//!
//! - Content survives the JSON chunk encoding unchanged
//! - Frame boundaries do not depend on how network reads split the body

use super::openai::decode_chunk;
use super::sse::{SseDecoder, SseFrame};
use super::types::StreamChunk;
use proptest::prelude::*;
use serde_json::json;

fn arb_token() -> impl Strategy<Value = String> {
    // Includes quotes, backslashes, newlines and non-ASCII to exercise escaping
    "[a-zA-Z0-9 \"\\\\\n\u{e9}\u{4e2d}\u{1f600}]{1,40}"
}

fn encode_delta(token: &str) -> String {
    json!({"choices": [{"index": 0, "delta": {"content": token}}]}).to_string()
}

proptest! {
    #[test]
    fn prop_delta_content_roundtrips(token in arb_token()) {
        let chunks = decode_chunk(&encode_delta(&token)).unwrap();
        prop_assert_eq!(chunks, vec![StreamChunk::Token(token)]);
    }

    #[test]
    fn prop_split_points_do_not_change_frames(
        tokens in proptest::collection::vec(arb_token(), 1..8),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
    ) {
        let mut body = String::new();
        for token in &tokens {
            body.push_str("data: ");
            body.push_str(&encode_delta(token));
            body.push_str("\n\n");
        }
        body.push_str("data: [DONE]\n\n");
        let bytes = body.as_bytes();

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len())).collect();
        offsets.push(0);
        offsets.push(bytes.len());
        offsets.sort_unstable();
        offsets.dedup();

        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for pair in offsets.windows(2) {
            frames.extend(decoder.push(&bytes[pair[0]..pair[1]]));
        }
        frames.extend(decoder.finish());

        prop_assert_eq!(frames.len(), tokens.len() + 1);
        prop_assert_eq!(frames.last(), Some(&SseFrame::Done));
        for (frame, token) in frames.iter().zip(&tokens) {
            match frame {
                SseFrame::Data(data) => {
                    let decoded = decode_chunk(data).unwrap();
                    prop_assert_eq!(decoded, vec![StreamChunk::Token(token.clone())]);
                }
                SseFrame::Done => prop_assert!(false, "unexpected [DONE]"),
            }
        }
    }
}
