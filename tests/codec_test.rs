//! Integration tests for the invocation codec and record accessors.

mod support;

use outbox_rs::codec::{self, Params};
use outbox_rs::error::Error;
use outbox_rs::model::{Invocation, OutboxRecord, Status};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    items: Vec<String>,
    note: Option<String>,
}

outbox_rs::param_type!(Order => "shop.Order");

fn round_trip<P: Params + PartialEq + Debug + Clone>(args: P) {
    let encoded = codec::encode(&args).unwrap();
    let values =
        codec::decode(&encoded.param_types, &encoded.param_values, &P::type_names()).unwrap();
    assert_eq!(P::from_values(values).unwrap(), args);
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn scalars_and_structs_round_trip() {
    round_trip(("hi".to_string(),));
    round_trip((42u32, -7i64, true));
    round_trip((
        Order {
            id: 9,
            items: vec!["a".to_string(), "b".to_string()],
            note: None,
        },
        1.5f64,
    ));
    round_trip((vec![1u8, 2, 3], Some("x".to_string()), None::<u32>, 'c'));
}

#[test]
fn payloads_containing_separators_round_trip() {
    // The legacy token, commas, and this codec's own framing characters.
    round_trip((
        "a__,,__b".to_string(),
        "x,y,z".to_string(),
        "3:abc;".to_string(),
        String::new(),
    ));
}

#[test]
fn zero_arguments_round_trip_to_empty_list() {
    let encoded = codec::encode(&()).unwrap();
    assert_eq!(encoded.param_types, "");
    assert_eq!(encoded.param_values, "");

    let values = codec::decode("", "", &[]).unwrap();
    assert!(values.is_empty(), "expected no arguments, got {values:?}");
    <() as Params>::from_values(values).unwrap();
}

#[test]
fn stored_type_identifiers_are_fixed() {
    let encoded = codec::encode(&("hi".to_string(), 7u32)).unwrap();
    assert_eq!(encoded.param_types, "6:string;3:u32;");
    assert_eq!(encoded.param_values, "4:\"hi\";1:7;");

    assert_eq!(
        <(Order, Vec<String>, Option<u64>)>::type_names(),
        vec!["shop.Order", "list<string>", "option<u64>"]
    );
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn unserializable_argument_is_rejected_at_enqueue() {
    // JSON object keys must be strings.
    let mut by_bytes = BTreeMap::new();
    by_bytes.insert(vec![1u8, 2u8], 3u8);

    let result = Invocation::new("Reports", "store", (by_bytes,));
    assert!(
        matches!(result, Err(Error::UnsupportedArgument(_))),
        "got {result:?}"
    );
}

#[test]
fn cardinality_mismatch_is_malformed() {
    let two = codec::encode(&(1u32, 2u32)).unwrap();
    let one = codec::encode(&(1u32,)).unwrap();

    let result = codec::decode(&two.param_types, &one.param_values, &<(u32, u32)>::type_names());
    assert!(matches!(result, Err(Error::MalformedRecord(_))), "got {result:?}");
}

#[test]
fn signature_mismatch_is_malformed() {
    let one = codec::encode(&(1u32,)).unwrap();
    let result = codec::decode(&one.param_types, &one.param_values, &<(u32, u32)>::type_names());
    assert!(matches!(result, Err(Error::MalformedRecord(_))), "got {result:?}");
}

#[test]
fn wrong_payload_type_is_malformed() {
    let encoded = codec::encode(&("not a number".to_string(),)).unwrap();
    let values = codec::decode(&encoded.param_types, &encoded.param_values, &["u32".to_string()])
        .unwrap();
    let result = <(u32,)>::from_values(values);
    assert!(matches!(result, Err(Error::MalformedRecord(_))), "got {result:?}");
}

#[test]
fn corrupted_payload_is_malformed() {
    let result = codec::decode("3:u32;", "2:{x;", &["u32".to_string()]);
    assert!(matches!(result, Err(Error::MalformedRecord(_))), "got {result:?}");
}

// ---------------------------------------------------------------------------
// Record accessors
// ---------------------------------------------------------------------------

#[test]
fn new_record_is_pending_and_unlocked() {
    let record = OutboxRecord::new(support::send("hi"));
    assert_eq!(record.status, Status::Pending);
    assert!(record.lock_id.is_none());
    assert!(record.error_message.is_none());
    assert_eq!(record.attempts, 0);
    assert_eq!(record.created_date, record.modified_date);
}

#[test]
fn describe_method_resolves_registered_types() {
    let registry = support::registry(Arc::default());
    let record = OutboxRecord::new(support::send("hi"));

    let key = record.describe_method(&registry).unwrap();
    assert_eq!(key.target_type, "NotificationService");
    assert_eq!(key.method_name, "send");
    assert_eq!(key.param_types, <(String,)>::type_names());

    let args = record.materialize_arguments(&key.param_types).unwrap();
    assert_eq!(args, vec![serde_json::json!("hi")]);

    assert_eq!(registry.len(), 3);
    let method = registry.resolve(&key).unwrap();
    assert_eq!(method.key(), &key);
}

#[test]
fn describe_method_reports_unknown_types() {
    let registry = support::registry(Arc::default());
    let record = OutboxRecord::new(
        Invocation::new(
            "NotificationService",
            "send",
            (Order {
                id: 1,
                items: vec![],
                note: None,
            },),
        )
        .unwrap(),
    );

    let result = record.describe_method(&registry);
    assert!(matches!(result, Err(Error::TypeResolution(_))), "got {result:?}");
}

#[test]
fn status_ordinals_match_stored_values() {
    assert_eq!(Status::Pending.ordinal(), None);
    assert_eq!(Status::Locked.ordinal(), Some(0));
    assert_eq!(Status::Success.ordinal(), Some(1));
    assert_eq!(Status::Fail.ordinal(), Some(2));
    for status in [Status::Pending, Status::Locked, Status::Success, Status::Fail] {
        assert_eq!(Status::from_ordinal(status.ordinal()).unwrap(), status);
        assert_eq!(status.to_string().parse::<Status>().unwrap(), status);
    }
    assert!(Status::from_ordinal(Some(7)).is_err());
}
