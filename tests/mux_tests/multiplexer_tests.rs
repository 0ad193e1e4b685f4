//! Multiplexer Tests
//!
//! These tests verify:
//! - Request creation and indexing per reply kind
//! - Coalescing of concurrent gets
//! - Reply dispatch and index cleanup
//! - Unsolicited, non-reply and malformed datagrams

use std::sync::Arc;

use bytes::Bytes;
use kvd_client::config::RetryPolicy;
use kvd_client::mux::{Actions, Dispatch, Multiplexer, Transmission};
use kvd_client::protocol::{decode, encode, CheckSig, Message, OpKind, Payload, SigType};
use kvd_client::{CallError, KvdError};
use parking_lot::Mutex;

// =============================================================================
// Helper Functions
// =============================================================================

fn mux() -> Multiplexer {
    Multiplexer::new(RetryPolicy::default())
}

fn sent(actions: Actions) -> Vec<Transmission> {
    actions.settle()
}

fn reply(op: OpKind, key: &str, payload: Option<Payload>) -> Vec<u8> {
    encode(&Message::new(op, key, payload)).unwrap().to_vec()
}

/// Feed a datagram and complete whatever it settles
fn deliver(mux: &mut Multiplexer, packet: &[u8]) -> Dispatch {
    let (dispatch, actions) = mux.on_datagram(packet);
    assert!(sent(actions).is_empty());
    dispatch
}

fn index_sizes(mux: &Multiplexer) -> Vec<usize> {
    OpKind::REPLIES.iter().map(|&kind| mux.index_len(kind)).collect()
}

// =============================================================================
// Get Tests
// =============================================================================

#[test]
fn test_get_sends_request_packet() {
    let mut mux = mux();
    let (_call, actions) = mux.get("user:1", None).unwrap();
    let transmissions = sent(actions);

    assert_eq!(transmissions.len(), 1);
    let message = decode(&transmissions[0].packet).unwrap();
    assert_eq!(message.op, OpKind::Request);
    assert_eq!(message.key, "user:1");
    assert_eq!(message.payload, None);
}

#[test]
fn test_get_with_bucket_carries_payload() {
    let mut mux = mux();
    let (_call, actions) = mux.get("user:1", Some("sessions".into())).unwrap();
    let message = decode(&sent(actions)[0].packet).unwrap();
    assert_eq!(message.payload, Some(Payload::Text("sessions".to_string())));
}

#[test]
fn test_get_indexed_under_value_and_novalue() {
    let mut mux = mux();
    let (_call, actions) = mux.get("k", None).unwrap();
    let _ = sent(actions);

    assert!(mux.is_indexed(OpKind::Value, "k"));
    assert!(mux.is_indexed(OpKind::NoValue, "k"));
    assert!(!mux.is_indexed(OpKind::Deleted, "k"));
    assert_eq!(mux.in_flight(), 1);
}

#[test]
fn test_value_reply_completes_get() {
    let mut mux = mux();
    let (call, actions) = mux.get("k", None).unwrap();
    let _ = sent(actions);

    let dispatch = deliver(&mut mux, &reply(OpKind::Value, "k", Some("v1".into())));
    assert_eq!(dispatch, Dispatch::Delivered);

    let reply = call.wait().unwrap();
    assert_eq!(reply.kind, OpKind::Value);
    assert!(reply.is_found());
    assert_eq!(reply.payload, Some(Payload::Text("v1".to_string())));
}

#[test]
fn test_novalue_reply_completes_without_value() {
    let mut mux = mux();
    let (call, actions) = mux.get("k", None).unwrap();
    let _ = sent(actions);

    deliver(&mut mux, &reply(OpKind::NoValue, "k", None));

    let reply = call.wait().unwrap();
    assert_eq!(reply.kind, OpKind::NoValue);
    assert!(!reply.is_found());
    assert_eq!(reply.payload, None);
}

#[test]
fn test_completion_clears_every_index() {
    let mut mux = mux();
    let (_call, actions) = mux.get("k", None).unwrap();
    let _ = sent(actions);

    deliver(&mut mux, &reply(OpKind::NoValue, "k", None));

    assert!(!mux.is_indexed(OpKind::Value, "k"));
    assert!(!mux.is_indexed(OpKind::NoValue, "k"));
    assert_eq!(mux.in_flight(), 0);
    assert_eq!(index_sizes(&mux), vec![0; 5]);
}

#[test]
fn test_concurrent_gets_share_one_request() {
    let mut mux = mux();
    let (first, actions) = mux.get("k", None).unwrap();
    assert_eq!(sent(actions).len(), 1);

    let (second, actions) = mux.get("k", None).unwrap();
    assert!(actions.is_empty());
    let _ = sent(actions);
    assert_eq!(mux.in_flight(), 1);

    deliver(&mut mux, &reply(OpKind::Value, "k", Some("shared".into())));

    let a = first.wait().unwrap();
    let b = second.wait().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.payload, Some(Payload::Text("shared".to_string())));
}

#[test]
fn test_waiters_notified_in_attachment_order() {
    let mut mux = mux();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..4 {
        let (call, actions) = mux.get("k", None).unwrap();
        let _ = sent(actions);
        let order = Arc::clone(&order);
        call.on_complete(move |outcome| {
            assert!(outcome.is_ok());
            order.lock().push(i);
        });
    }

    deliver(&mut mux, &reply(OpKind::Value, "k", Some("v".into())));
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn test_get_after_completion_starts_fresh_request() {
    let mut mux = mux();
    let (_first, actions) = mux.get("k", None).unwrap();
    let first_id = sent(actions)[0].request;
    deliver(&mut mux, &reply(OpKind::Value, "k", Some("v".into())));

    let (second, actions) = mux.get("k", None).unwrap();
    let transmissions = sent(actions);
    assert_eq!(transmissions.len(), 1);
    assert_ne!(transmissions[0].request, first_id);
    assert_eq!(transmissions[0].timeout, RetryPolicy::default().get_timeout);
    assert!(!second.is_complete());
}

#[test]
fn test_oversized_key_fails_without_traffic() {
    let mut mux = mux();
    let key = "k".repeat(33);
    match mux.get(&key, None) {
        Err(KvdError::Encoding(_)) => {}
        other => panic!("Expected Encoding error, got {:?}", other.map(|(call, _)| call)),
    }
    assert_eq!(mux.in_flight(), 0);
    assert_eq!(index_sizes(&mux), vec![0; 5]);
}

// =============================================================================
// Create / Update / Delete / CheckSig Tests
// =============================================================================

#[test]
fn test_create_uses_fresh_request_key() {
    let mut mux = mux();
    let (call, actions) = mux.create(Some(serde_json::json!({"n": 1}).into())).unwrap();
    let message = decode(&sent(actions)[0].packet).unwrap();

    assert_eq!(message.op, OpKind::Create);
    assert_eq!(message.key.len(), 32);
    assert!(message.key.bytes().all(|b| b.is_ascii_alphanumeric()));
    assert!(mux.is_indexed(OpKind::Created, &message.key));

    let assigned = "0123456789abcdef0123456789abcdef";
    deliver(&mut mux, &reply(OpKind::Created, &message.key, Some(assigned.into())));

    let reply = call.wait().unwrap();
    assert_eq!(reply.kind, OpKind::Created);
    assert_eq!(reply.key, message.key);
    assert_eq!(reply.payload, Some(Payload::Text(assigned.to_string())));
}

#[test]
fn test_two_creates_get_distinct_keys() {
    let mut mux = mux();
    let (_a, actions) = mux.create(None).unwrap();
    let a = decode(&sent(actions)[0].packet).unwrap().key;
    let (_b, actions) = mux.create(None).unwrap();
    let b = decode(&sent(actions)[0].packet).unwrap().key;
    assert_ne!(a, b);
    assert_eq!(mux.index_len(OpKind::Created), 2);
}

#[test]
fn test_update_completes_on_updated() {
    let mut mux = mux();
    let (call, actions) = mux.update("k", Some("new".into())).unwrap();
    let message = decode(&sent(actions)[0].packet).unwrap();
    assert_eq!(message.op, OpKind::Update);
    assert!(mux.is_indexed(OpKind::Updated, "k"));

    deliver(&mut mux, &reply(OpKind::Updated, "k", None));
    let reply = call.wait().unwrap();
    assert_eq!(reply.kind, OpKind::Updated);
    assert_eq!(reply.payload, None);
}

#[test]
fn test_deleted_reply_never_carries_value() {
    let mut mux = mux();
    let (call, actions) = mux.delete("k").unwrap();
    let _ = sent(actions);

    deliver(&mut mux, &reply(OpKind::Deleted, "k", Some("ignored".into())));
    assert_eq!(call.wait().unwrap().payload, None);
}

#[test]
fn test_identical_update_joins_in_flight_request() {
    let mut mux = mux();
    let (first, actions) = mux.update("k", Some("v".into())).unwrap();
    let _ = sent(actions);
    let (second, actions) = mux.update("k", Some("v".into())).unwrap();
    assert!(sent(actions).is_empty());

    deliver(&mut mux, &reply(OpKind::Updated, "k", None));
    assert!(first.is_complete());
    assert!(second.is_complete());
}

#[test]
fn test_conflicting_update_refused() {
    let mut mux = mux();
    let (_first, actions) = mux.update("k", Some("v1".into())).unwrap();
    let _ = sent(actions);

    match mux.update("k", Some("v2".into())) {
        Err(KvdError::InFlight { op, key }) => {
            assert_eq!(op, OpKind::Update);
            assert_eq!(key, "k");
        }
        other => panic!("Expected InFlight, got {:?}", other.map(|(call, _)| call)),
    }
    assert_eq!(mux.in_flight(), 1);
}

#[test]
fn test_check_signature_round_trip() {
    let mut mux = mux();
    let record = CheckSig::new(SigType::HmacSha256, "bob", vec![0xAAu8, 0xBB], vec![1u8, 2, 3]);
    let (call, actions) = mux.check_signature(record.clone()).unwrap();
    let message = decode(&sent(actions)[0].packet).unwrap();

    assert_eq!(message.op, OpKind::CheckSig);
    assert_eq!(message.payload, Some(Payload::CheckSig(record)));
    assert!(mux.is_indexed(OpKind::Value, &message.key));
    assert!(mux.is_indexed(OpKind::NoValue, &message.key));

    deliver(&mut mux, &reply(OpKind::NoValue, &message.key, None));
    let reply = call.wait().unwrap();
    assert!(!reply.is_found());
    assert_eq!(mux.in_flight(), 0);
}

// =============================================================================
// Inbound Dispatch Tests
// =============================================================================

#[test]
fn test_unsolicited_reply_changes_nothing() {
    let mut mux = mux();
    let (call, actions) = mux.get("mine", None).unwrap();
    let _ = sent(actions);
    let before = index_sizes(&mux);

    let dispatch = deliver(&mut mux, &reply(OpKind::Value, "other", Some("x".into())));

    assert_eq!(dispatch, Dispatch::Unsolicited);
    assert_eq!(index_sizes(&mux), before);
    assert_eq!(mux.in_flight(), 1);
    assert!(!call.is_complete());
}

#[test]
fn test_reply_of_wrong_kind_is_unsolicited() {
    let mut mux = mux();
    let (call, actions) = mux.delete("k").unwrap();
    let _ = sent(actions);

    assert_eq!(deliver(&mut mux, &reply(OpKind::Updated, "k", None)), Dispatch::Unsolicited);
    assert_eq!(deliver(&mut mux, &reply(OpKind::Value, "k", None)), Dispatch::Unsolicited);
    assert!(!call.is_complete());
    assert!(mux.is_indexed(OpKind::Deleted, "k"));
}

#[test]
fn test_duplicate_reply_is_unsolicited() {
    let mut mux = mux();
    let (_call, actions) = mux.get("k", None).unwrap();
    let _ = sent(actions);

    let packet = reply(OpKind::Value, "k", Some("v".into()));
    assert_eq!(deliver(&mut mux, &packet), Dispatch::Delivered);
    assert_eq!(deliver(&mut mux, &packet), Dispatch::Unsolicited);
}

#[test]
fn test_non_replies_discarded() {
    let mut mux = mux();
    let (call, actions) = mux.get("k", None).unwrap();
    let _ = sent(actions);

    assert_eq!(deliver(&mut mux, &reply(OpKind::Sync, "k", None)), Dispatch::Discarded);
    assert_eq!(deliver(&mut mux, &reply(OpKind::Request, "k", None)), Dispatch::Discarded);

    let mut unknown = reply(OpKind::Value, "k", None);
    unknown[0] = 8;
    assert_eq!(deliver(&mut mux, &unknown), Dispatch::Discarded);
    assert!(!call.is_complete());
}

#[test]
fn test_malformed_datagrams_dropped() {
    let mut mux = mux();
    let (call, actions) = mux.get("k", None).unwrap();
    let _ = sent(actions);

    let mut bad_reserved = reply(OpKind::Value, "k", Some("v".into()));
    bad_reserved[1] = 0x7f;
    let bad_json = reply(OpKind::Value, "k", Some(Payload::Bytes(Bytes::from_static(b"{x"))));

    assert_eq!(deliver(&mut mux, &[]), Dispatch::Malformed);
    assert_eq!(deliver(&mut mux, &[3, 0]), Dispatch::Malformed);
    assert_eq!(deliver(&mut mux, &bad_reserved), Dispatch::Malformed);
    assert_eq!(deliver(&mut mux, &bad_json), Dispatch::Malformed);
    assert!(!call.is_complete());
    assert_eq!(mux.in_flight(), 1);
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[test]
fn test_shutdown_fails_everything_in_flight() {
    let mut mux = mux();
    let (get, actions) = mux.get("a", None).unwrap();
    let _ = sent(actions);
    let (delete, actions) = mux.delete("b").unwrap();
    let _ = sent(actions);

    assert!(sent(mux.shutdown()).is_empty());

    assert_eq!(get.try_outcome(), Some(Err(CallError::Shutdown)));
    assert_eq!(delete.try_outcome(), Some(Err(CallError::Shutdown)));
    assert_eq!(mux.in_flight(), 0);
    assert_eq!(index_sizes(&mux), vec![0; 5]);
}
