//! Integration tests for stompwire-client.
//!
//! These tests verify the integration between the codec, handshake and
//! message modules through the public API.

use bytes::Bytes;
use stompwire_client::control::{build_connect_frame, parse_connected};
use stompwire_client::protocol::{encode_frame, Command, Frame, FrameBuffer, Version};
use stompwire_client::{build_ack_frame, AckMode, ClientConfig, Message, ServerError};

fn decoder(version: Version) -> FrameBuffer {
    let mut buffer = FrameBuffer::new();
    buffer.set_version(version);
    buffer
}

/// Test a MESSAGE frame with a binary body through encoder, decoder and Message.
#[test]
fn test_message_with_binary_body() {
    let body = Bytes::from_static(b"\x00\x01binary\x00tail");
    let frame = Frame::new(Command::Message)
        .header("destination", "/topic/fedora")
        .header("subscription", "sub-0")
        .header("message-id", "m-1")
        .header("content-type", "application/octet-stream")
        .with_body(body.clone());

    let wire = encode_frame(&frame, Version::V1_2);
    let frames = decoder(Version::V1_2).push(&wire).unwrap();
    assert_eq!(frames.len(), 1);

    let message = Message::from_frame(frames[0].clone(), AckMode::Client);
    assert_eq!(message.body, body);
    assert_eq!(message.content_type, "application/octet-stream");
    assert_eq!(message.subscription, "sub-0");
}

/// Test multiple frames in sequence, separated by heart-beats.
#[test]
fn test_multiple_frames_sequence() {
    let mut buffer = decoder(Version::V1_2);
    let mut all_bytes = Vec::new();

    for i in 1..=5 {
        let frame = Frame::new(Command::Message)
            .header("subscription", "sub-0")
            .header("message-id", i.to_string())
            .with_body(Bytes::from(format!("message_{}", i)));
        all_bytes.extend_from_slice(&encode_frame(&frame, Version::V1_2));
        all_bytes.extend_from_slice(b"\n");
    }

    let frames = buffer.push(&all_bytes).unwrap();
    assert_eq!(frames.len(), 5);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.get("message-id"), Some((i + 1).to_string().as_str()));
        assert_eq!(frame.body, Bytes::from(format!("message_{}", i + 1)));
    }
    assert!(buffer.is_empty());
}

/// Test header values that need escaping on 1.2.
#[test]
fn test_escaped_headers_survive() {
    let frame = Frame::new(Command::Message)
        .header("subscription", "sub-0")
        .header("x-path", "a:b\\c\nd");

    let wire = encode_frame(&frame, Version::V1_2);
    assert!(wire.windows(4).any(|w| w == b"a\\cb"));

    let frames = decoder(Version::V1_2).push(&wire).unwrap();
    assert_eq!(frames[0].get("x-path"), Some("a:b\\c\nd"));
}

/// Test ERROR frame pattern: becomes a terminal message.
#[test]
fn test_error_frame_pattern() {
    let wire = b"ERROR\nsubscription:sub-2\nmessage:bad destination\ncontent-type:text/plain\n\nno such queue\0";
    let frames = decoder(Version::V1_2).push(wire).unwrap();

    let error = ServerError::from_frame(frames[0].clone());
    assert_eq!(error.message, "bad destination");

    let terminal = Message::terminal("sub-2", "/queue/missing", AckMode::Client, error);
    assert!(terminal.is_terminal());
    assert_eq!(&terminal.body[..], b"no such queue");
    assert!(build_ack_frame(Command::Ack, &terminal, Version::V1_2).is_err());
}

/// Test ACK pattern: decoded MESSAGE acked with the negotiated version.
#[test]
fn test_ack_pattern() {
    let wire = b"MESSAGE\nsubscription:sub-0\nmessage-id:m-9\nack:a-9\ndestination:/topic/x\n\n\0";
    let frames = decoder(Version::V1_2).push(wire).unwrap();
    let message = Message::from_frame(frames[0].clone(), AckMode::ClientIndividual);

    let ack = build_ack_frame(Command::Ack, &message, Version::V1_2).unwrap();
    assert_eq!(&encode_frame(&ack, Version::V1_2)[..], b"ACK\nid:a-9\n\n\0");

    let ack = build_ack_frame(Command::Ack, &message, Version::V1_1).unwrap();
    assert_eq!(
        &encode_frame(&ack, Version::V1_1)[..],
        b"ACK\nmessage-id:m-9\nsubscription:sub-0\n\n\0"
    );
}

/// Test handshake frames: CONNECT is never escaped, CONNECTED is parsed.
#[test]
fn test_handshake_frames() {
    let mut config = ClientConfig::default();
    config.vhost = Some("a:b".to_string());

    let wire = encode_frame(&build_connect_frame(&config), Version::V1_2);
    assert!(wire.starts_with(b"CONNECT\n"));
    assert!(wire.windows(7).any(|w| w == b"host:a:"));

    let frames = decoder(Version::V1_0)
        .push(b"CONNECTED\r\nversion:1.1\r\nheart-beat:0,0\r\n\r\n\0")
        .unwrap();
    let session = parse_connected(&frames[0], &config).unwrap();
    assert_eq!(session.version, Version::V1_1);
}

/// Test fragmented frame parsing.
#[test]
fn test_fragmented_frame_parsing() {
    let frame = Frame::new(Command::Message)
        .header("subscription", "sub-0")
        .with_body(Bytes::from(vec![b'x'; 1000]));
    let wire = encode_frame(&frame, Version::V1_2);

    let mut buffer = decoder(Version::V1_2);
    let mut frames = Vec::new();
    for chunk in wire.chunks(7) {
        frames.extend(buffer.push(chunk).unwrap());
    }

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].body.len(), 1000);
}
