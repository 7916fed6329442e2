use super::*;
use crate::{Encoding, MessageStatus, MessageType, UNKNOWN_ORIGIN};

fn message(id: i64, data: &str) -> Message {
    Message {
        id,
        origin: "A".to_owned(),
        target: "B".to_owned(),
        identifier: "TEST".to_owned(),
        data: data.to_owned(),
        kind: MessageType::Request,
        ..Message::default()
    }
}

fn stream(codec: &Codec, messages: &[Message]) -> Vec<u8> {
    messages
        .iter()
        .flat_map(|m| codec.encode_frame(m).expect("encode"))
        .collect()
}

fn feed_in_chunks(framer: &mut Framer, bytes: &[u8], chunk: usize) -> Vec<Message> {
    bytes.chunks(chunk).flat_map(|c| framer.append(c)).collect()
}

#[test]
fn single_frame_in_one_read() {
    let codec = Codec::new(Encoding::Binary, vec![0]);
    let mut framer = Framer::new(codec.clone());
    let out = framer.append(&codec.encode_frame(&message(0, "1")).expect("encode"));
    assert_eq!(out, vec![message(0, "1")]);
    assert_eq!(framer.pending_len(), 0);
}

#[test]
fn many_frames_in_one_read() {
    let codec = Codec::new(Encoding::Json, vec![0]);
    let expected: Vec<Message> = (0..5).map(|i| message(i, &format!("m{i}"))).collect();
    let mut framer = Framer::new(codec.clone());
    assert_eq!(framer.append(&stream(&codec, &expected)), expected);
}

#[test]
fn every_chunk_size_yields_all_frames_in_order() {
    for encoding in [Encoding::Binary, Encoding::Json] {
        for delimiter in [vec![0u8], vec![0x1e, 0x1f, 0x1e]] {
            let codec = Codec::new(encoding, delimiter);
            let expected: Vec<Message> = (0..7).map(|i| message(i, &"p".repeat(usize::try_from(i).unwrap_or(0) * 13))).collect();
            let bytes = stream(&codec, &expected);
            for chunk in 1..=bytes.len().min(64) {
                let mut framer = Framer::new(codec.clone());
                let out = feed_in_chunks(&mut framer, &bytes, chunk);
                assert_eq!(out, expected, "{encoding:?} chunk={chunk}");
                assert_eq!(framer.pending_len(), 0);
            }
        }
    }
}

#[test]
fn delimiter_split_across_reads() {
    let codec = Codec::new(Encoding::Binary, vec![0x1e, 0x1f]);
    let bytes = codec.encode_frame(&message(3, "x")).expect("encode");
    let (head, tail) = bytes.split_at(bytes.len() - 1);
    let mut framer = Framer::new(codec);
    assert!(framer.append(head).is_empty());
    assert_eq!(framer.append(tail), vec![message(3, "x")]);
}

#[test]
fn partial_frame_is_kept_until_terminated() {
    let codec = Codec::new(Encoding::Json, vec![0]);
    let bytes = codec.encode_frame(&message(1, "hello")).expect("encode");
    let mut framer = Framer::new(codec);
    assert!(framer.append(&bytes[..5]).is_empty());
    assert_eq!(framer.pending_len(), 5);
    assert_eq!(framer.append(&bytes[5..]), vec![message(1, "hello")]);
}

#[test]
fn empty_and_whitespace_frames_are_discarded() {
    let codec = Codec::new(Encoding::Json, vec![0]);
    let mut framer = Framer::new(codec.clone());
    let mut bytes = b"\0  \n\0".to_vec();
    bytes.extend(codec.encode_frame(&message(9, "z")).expect("encode"));
    assert_eq!(framer.append(&bytes), vec![message(9, "z")]);
}

#[test]
fn undecodable_body_becomes_malformed_message() {
    let codec = Codec::new(Encoding::Json, vec![0]);
    let mut framer = Framer::new(codec.clone());
    let mut bytes = b"{not json\0".to_vec();
    bytes.extend(codec.encode_frame(&message(2, "after")).expect("encode"));
    let out = framer.append(&bytes);

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].status, MessageStatus::MalformedMessageError);
    assert_eq!(out[0].origin, UNKNOWN_ORIGIN);
    assert!(out[0].data.contains("{not json"));
    assert_eq!(out[1], message(2, "after"));
}

#[test]
fn overflow_clears_unterminated_buffer() {
    let codec = Codec::new(Encoding::Binary, vec![0]);
    let mut framer = Framer::with_limit(codec.clone(), 64);
    assert!(framer.append(&[b'A'; 40]).is_empty());
    assert!(framer.append(&[b'A'; 40]).is_empty());
    assert_eq!(framer.pending_len(), 0);

    // The framer keeps working after the reset.
    let out = framer.append(&codec.encode_frame(&message(5, "ok")).expect("encode"));
    assert_eq!(out, vec![message(5, "ok")]);
}

#[test]
fn clear_drops_partial_frame() {
    let codec = Codec::new(Encoding::Binary, vec![0]);
    let mut framer = Framer::new(codec);
    framer.append(b"abc");
    framer.clear();
    assert_eq!(framer.pending_len(), 0);
}
