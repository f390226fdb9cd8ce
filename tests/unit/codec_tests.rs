//! Unit tests for the NDJSON frame codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use robot_session::protocol::codec::{FrameCodec, MAX_LINE_BYTES};
use robot_session::ClientError;

// ── Decoding ────────────────────────────────────────────────────────────────

/// A complete line is returned without its trailing newline.
#[test]
fn single_line_decodes() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("[\"robot-info\",{},1]\n");

    let line = codec.decode(&mut buf).expect("decode");
    assert_eq!(line.as_deref(), Some("[\"robot-info\",{},1]"));
}

/// Two lines in one buffer come out as two frames.
#[test]
fn batched_lines_decode_separately() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("[\"a\",{}]\n[\"b\",{}]\n");

    assert_eq!(codec.decode(&mut buf).expect("first").as_deref(), Some("[\"a\",{}]"));
    assert_eq!(codec.decode(&mut buf).expect("second").as_deref(), Some("[\"b\",{}]"));
    assert!(codec.decode(&mut buf).expect("empty").is_none());
}

/// A partial line is held until its newline arrives.
#[test]
fn partial_line_waits_for_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("[\"timestamp\",");

    assert!(codec.decode(&mut buf).expect("partial").is_none());

    buf.extend_from_slice(b"{}]\n");
    assert_eq!(
        codec.decode(&mut buf).expect("complete").as_deref(),
        Some("[\"timestamp\",{}]")
    );
}

/// An oversized line is reported and the codec recovers on the next line.
#[test]
fn oversized_line_is_reported_then_skipped() {
    let mut codec = FrameCodec::with_max_length(16);
    let mut buf = BytesMut::from(format!("{}\n[\"ok\",{{}}]\n", "x".repeat(64)).as_str());

    match codec.decode(&mut buf) {
        Err(ClientError::Protocol(msg)) => {
            assert!(msg.contains("frame too long"), "got {msg}");
            assert!(msg.contains("16"), "limit is named: {msg}");
        }
        other => panic!("expected a framing error, got {other:?}"),
    }

    assert_eq!(
        codec.decode(&mut buf).expect("recovered").as_deref(),
        Some("[\"ok\",{}]")
    );
}

/// The default limit is 1 MiB.
#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1_048_576);
    assert_eq!(FrameCodec::new().max_length(), MAX_LINE_BYTES);
    assert_eq!(FrameCodec::default().max_length(), MAX_LINE_BYTES);
}

// ── Encoding ────────────────────────────────────────────────────────────────

/// Encoding appends a newline terminator.
#[test]
fn encode_appends_newline() {
    let mut codec = FrameCodec::new();
    let mut dst = BytesMut::new();

    codec
        .encode("[\"get-timestamp\",{},3]".to_owned(), &mut dst)
        .expect("encode");
    assert_eq!(&dst[..], b"[\"get-timestamp\",{},3]\n");
}
