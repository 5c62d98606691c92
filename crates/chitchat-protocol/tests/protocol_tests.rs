//! Protocol layer tests — delimiter framing, pass-through mode, outbound encoding.

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use chitchat_protocol::*;
    use futures_util::StreamExt;
    use serde::Serialize;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{Decoder, FramedRead};

    fn decode_all(delimiter: u8, input: &[u8]) -> Vec<Bytes> {
        let mut codec = FrameCodec::new(delimiter);
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode_eof(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    // ─────────────────────────────────────────────────────────────────────
    // Delimiter mode
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn splits_on_newline() {
        let frames = decode_all(b'\n', b"ping\nok\n");
        assert_eq!(frames, vec![Bytes::from_static(b"ping"), Bytes::from_static(b"ok")]);
    }

    #[test]
    fn empty_frames_between_adjacent_delimiters() {
        let frames = decode_all(b';', b"a;;b;");
        assert_eq!(
            frames,
            vec![Bytes::from_static(b"a"), Bytes::new(), Bytes::from_static(b"b")]
        );
    }

    #[test]
    fn trailing_partial_frame_is_dropped() {
        let frames = decode_all(b'\n', b"one\ntwo\nthr");
        assert_eq!(frames, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    }

    #[test]
    fn stream_without_delimiter_yields_nothing() {
        assert!(decode_all(b'\n', b"no boundary here").is_empty());
    }

    #[test]
    fn reassembly_reproduces_stream_minus_partial_tail() {
        let cases: &[(u8, &[u8])] = &[
            (b'\n', b"alpha\nbeta\ngamma\ntail"),
            (b'|', b"||x|yy|zzz|"),
            (0xff, &[1, 2, 0xff, 3, 0xff, 0xff, 4]),
            (b'\n', b"\n"),
        ];
        for (delimiter, stream) in cases {
            let frames = decode_all(*delimiter, stream);
            let mut rebuilt = Vec::new();
            for frame in &frames {
                rebuilt.extend_from_slice(frame);
                rebuilt.push(*delimiter);
            }
            let complete = match stream.iter().rposition(|b| b == delimiter) {
                Some(last) => &stream[..=last],
                None => &[][..],
            };
            assert_eq!(rebuilt, complete, "delimiter {delimiter:#04x}");
        }
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut codec = FrameCodec::new(b'\n');
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\nwor");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ld\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"world"));
    }

    #[tokio::test]
    async fn framed_read_preserves_order() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            for chunk in [&b"fir"[..], b"st\nsec", b"ond\nthird\n"] {
                tx.write_all(chunk).await.unwrap();
            }
        });

        let frames: Vec<Bytes> = FramedRead::new(rx, FrameCodec::new(b'\n'))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"first"),
                Bytes::from_static(b"second"),
                Bytes::from_static(b"third"),
            ]
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pass-through mode
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn passthrough_returns_whole_buffer() {
        let mut codec = FrameCodec::new(PASSTHROUGH);
        assert!(codec.is_passthrough());
        let mut buf = BytesMut::from(&b"a\nb\0c"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"a\nb\0c"));
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn passthrough_one_frame_per_chunk() {
        let mut codec = FrameCodec::new(PASSTHROUGH);
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in [&b"abc"[..], b"\n\n", b"xyz"] {
            buf.extend_from_slice(chunk);
            frames.push(codec.decode(&mut buf).unwrap().unwrap());
        }
        assert_eq!(frames, vec![
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"\n\n"),
            Bytes::from_static(b"xyz"),
        ]);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Encoding
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn encode_raw_appends_delimiter() {
        let out = encode_raw(Bytes::from_static(b"pong"), b'\n').unwrap();
        assert_eq!(&out[..], b"pong\n");
    }

    #[test]
    fn encode_raw_passthrough_has_no_terminator() {
        let out = encode_raw(Bytes::from_static(b"a\nb"), PASSTHROUGH).unwrap();
        assert_eq!(&out[..], b"a\nb");
    }

    #[test]
    fn encode_raw_rejects_embedded_delimiter() {
        let err = encode_raw(Bytes::from_static(b"two\nlines"), b'\n').unwrap_err();
        assert!(matches!(err, ProtocolError::DelimiterInPayload(b'\n')));
        assert!(!err.is_io());
    }

    #[test]
    fn encode_value_is_compact_json() {
        #[derive(Serialize)]
        struct Reply<'a> {
            status: &'a str,
            count: u32,
        }

        let out = encode_value(&Reply { status: "ok", count: 2 }, b'\n').unwrap();
        assert_eq!(&out[..], b"{\"status\":\"ok\",\"count\":2}\n");

        let text = encode_value(&json!("multi\nline"), b'\n').unwrap();
        assert_eq!(&text[..], b"\"multi\\nline\"\n");
    }

    #[test]
    fn encode_value_keeps_json_containing_the_delimiter() {
        let object = encode_value(&json!({"a": 1, "b": 2}), b',').unwrap();
        assert_eq!(&object[..], b"{\"a\":1,\"b\":2},");

        let text = encode_value(&json!("hello, world"), b',').unwrap();
        assert_eq!(&text[..], b"\"hello, world\",");
    }

    #[test]
    fn encoded_value_decodes_back() {
        let wire = encode_value(&json!({"k": [1, 2, 3]}), b'\n').unwrap();
        let frames = decode_all(b'\n', &wire);
        assert_eq!(frames.len(), 1);
        let parsed: serde_json::Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(parsed, json!({"k": [1, 2, 3]}));
    }
}
