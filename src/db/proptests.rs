//! Property-based tests for persistence
//!
//! - JSON payloads, finite floats included, come back from SQLite
//!   exactly as stored
//! - Sequence numbers stay dense and ordered for any append count

use super::*;
use proptest::prelude::*;
use serde_json::{Map, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(Value::from),
        "[a-zA-Z0-9 _\"\\\\\n\u{e9}\u{1f600}]{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_execution_payloads_roundtrip(input in arb_json(), output in arb_json()) {
        let db = Database::open_in_memory().unwrap();
        let created = db
            .create_tool_execution(&NewToolExecution {
                message_id: None,
                tool_name: "fs.read".to_string(),
                input_json: input.clone(),
            })
            .unwrap();
        db.update_tool_execution(&created.id, &ExecutionOutcome::Completed { output: output.clone() })
            .unwrap();

        let stored = db.get_tool_execution(&created.id).unwrap();
        prop_assert_eq!(stored.input_json, input);
        prop_assert_eq!(stored.output_json, Some(output));
    }

    #[test]
    fn prop_message_content_json_roundtrips(payload in arb_json()) {
        let db = Database::open_in_memory().unwrap();
        db.resolve_or_create_session("s", &SessionDefaults::default()).unwrap();
        let mut message = NewMessage::new("s", Role::Assistant, "text");
        message.content_json = Some(payload.clone());
        db.append_message(&message).unwrap();

        let stored = db.list_messages("s", 1).unwrap();
        prop_assert_eq!(stored[0].content_json.clone(), Some(payload));
    }

    #[test]
    fn prop_sequence_ids_are_dense(count in 1usize..20) {
        let db = Database::open_in_memory().unwrap();
        db.resolve_or_create_session("s", &SessionDefaults::default()).unwrap();
        for i in 0..count {
            db.append_message(&NewMessage::new("s", Role::User, i.to_string())).unwrap();
        }

        let messages = db.list_messages("s", count).unwrap();
        let sequence: Vec<i64> = messages.iter().map(|m| m.sequence_id).collect();
        let expected: Vec<i64> = (1..=i64::try_from(count).unwrap()).rev().collect();
        prop_assert_eq!(sequence, expected);
    }
}
