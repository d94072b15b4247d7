use serde_json::json;

use crate::*;

// ============================================================================
//  ENVELOPE RULES
// ============================================================================

fn greeter_call(id: &str) -> Request {
    Request::new(
        RequestId::from(id),
        "Greeter",
        "say_hello",
        vec![json!("world")],
        vec!["String".into()],
    )
}

#[test]
fn test_call_frame_keeps_id_verbatim() {
    let codec = JsonCodec;
    let id = "Greeter-5f0c1e4e-8a7b-4d0e-9b9c-1f7d7a1c2b3d";
    let bytes = codec.encode(&Frame::Call(greeter_call(id))).unwrap();

    match codec.decode(&bytes).unwrap() {
        Frame::Call(req) => {
            assert_eq!(req.id.as_str(), id);
            assert_eq!(req.interface, "Greeter");
            assert_eq!(req.method, "say_hello");
            assert_eq!(req.param_types, vec!["String".to_string()]);
        }
        Frame::Reply(_) => panic!("expected a call frame"),
    }
}

#[test]
fn test_encode_rejects_arg_type_count_mismatch() {
    let mut req = greeter_call("a");
    req.param_types.clear();

    let err = JsonCodec.encode(&Frame::Call(req)).unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));
}

#[test]
fn test_decode_rejects_reply_with_result_and_fault() {
    let raw = json!({
        "frame": "reply",
        "id": "a",
        "result": 1,
        "fault": { "kind": "Internal", "message": "boom" },
    });
    let bytes = serde_json::to_vec(&raw).unwrap();

    let err = JsonCodec.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));
}

#[test]
fn test_decode_skips_unknown_fields() {
    let raw = json!({
        "frame": "reply",
        "id": "a",
        "result": "ok",
        "server_time_ms": 12,
    });
    let bytes = serde_json::to_vec(&raw).unwrap();

    let frame = JsonCodec.decode(&bytes).unwrap();
    assert_eq!(frame, Frame::Reply(Response::ok("a".into(), json!("ok"))));
}

#[test]
fn test_reply_without_result_is_unit() {
    let resp = Response { id: "a".into(), result: None, fault: None };
    assert_eq!(resp.into_outcome(), Ok(serde_json::Value::Null));
}

#[test]
fn test_fault_reply_surfaces_fault() {
    let fault = RemoteFault::new(FaultKind::Application, "name must not be empty")
        .with_detail(json!({ "field": "name" }));
    let bytes = JsonCodec
        .encode(&Frame::Reply(Response::fault("a".into(), fault.clone())))
        .unwrap();

    let Frame::Reply(resp) = JsonCodec.decode(&bytes).unwrap() else {
        panic!("expected a reply frame");
    };
    assert_eq!(resp.into_outcome(), Err(fault));
}

#[test]
fn test_peek_id_survives_malformed_body() {
    // `result` and `fault` both present fails validation, but the id is readable.
    let raw = br#"{"frame":"reply","id":"late-1","result":1,"fault":{"kind":"Internal","message":"x"}}"#;
    assert!(JsonCodec.decode(raw).is_err());
    assert_eq!(JsonCodec.peek_id(raw).unwrap(), RequestId::from("late-1"));
}

#[test]
fn test_peek_id_on_garbage() {
    assert!(matches!(JsonCodec.peek_id(b"\x00\x01"), Err(Error::Serialization(_))));
}

// ============================================================================
//  FRAMING
// ============================================================================

#[tokio::test]
async fn test_frames_arrive_in_order_and_intact() {
    let (mut a, mut b) = tokio::io::duplex(64);

    let writer = tokio::spawn(async move {
        write_frame(&mut a, b"first", DEFAULT_MAX_FRAME_LEN).await.unwrap();
        write_frame(&mut a, &[7u8; 300], DEFAULT_MAX_FRAME_LEN).await.unwrap();
    });

    let one = read_frame(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap();
    let two = read_frame(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap();
    writer.await.unwrap();

    assert_eq!(one.as_deref(), Some(&b"first"[..]));
    assert_eq!(two.map(|v| v.len()), Some(300));
    // writer dropped: clean end of stream
    assert_eq!(read_frame(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap(), None);
}

#[tokio::test]
async fn test_write_rejects_oversized_payload() {
    let (mut a, _b) = tokio::io::duplex(64);
    let err = write_frame(&mut a, &[0u8; 10], 8).await.unwrap_err();
    assert_eq!(err, Error::FrameTooLarge { len: 10, max: 8 });
}

#[tokio::test]
async fn test_read_rejects_oversized_header() {
    let mut input: &[u8] = &[0, 0, 1, 0, 1, 2, 3];
    let err = read_frame(&mut input, 16).await.unwrap_err();
    assert_eq!(err, Error::FrameTooLarge { len: 256, max: 16 });
}

#[tokio::test]
async fn test_read_truncated_frame_is_error() {
    let mut header_only: &[u8] = &[0, 0];
    assert!(matches!(read_frame(&mut header_only, 16).await, Err(Error::Io(_))));

    let mut short_body: &[u8] = &[0, 0, 0, 4, 1, 2];
    assert!(matches!(read_frame(&mut short_body, 16).await, Err(Error::Io(_))));
}
