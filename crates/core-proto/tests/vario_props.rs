//! Property tests for the byte-stuffed codec: encode/decode round trips
//! and stream resynchronisation never inventing frames.

use core_proto::vario::{Response, VarioCodec};
use core_transport::MockTransport;
use proptest::prelude::*;

const ESC: u8 = 0x1B;

/// Payload bytes (after the type byte) for each frame type at a cell
/// count of 40.
fn body_len(code: u8) -> usize {
    match code {
        0x01 | 0x05 | 0x16 | 0x24 | 0x40 => 1,
        0x11 => 2,
        0x22 => 5,
        0x84 => 16,
        0x8A => 8,
        0x8C => 14,
        _ => unreachable!(),
    }
}

fn frame_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Response::CellCount as u8),
        Just(Response::VersionNumber as u8),
        Just(Response::ModeSetting as u8),
        Just(Response::CommunicationChannel as u8),
        Just(Response::RoutingKeys as u8),
        Just(Response::TopKeys as u8),
        Just(Response::ErrorCode as u8),
        Just(Response::DeviceIdentity as u8),
        Just(Response::SerialNumber as u8),
        Just(Response::BluetoothName as u8),
    ]
    .prop_flat_map(|code| {
        proptest::collection::vec(any::<u8>(), body_len(code)).prop_map(move |mut body| {
            let mut frame = vec![code];
            frame.append(&mut body);
            frame
        })
    })
}

proptest! {
    /// decode(encode(P)) == P for every well-formed payload.
    #[test]
    fn round_trip(payload in frame_strategy()) {
        let mut io = MockTransport::new();
        VarioCodec::write_packet(&mut io, &payload).unwrap();
        let encoded = io.take_written();

        let mut io = MockTransport::new();
        io.push_input(&encoded);
        let mut codec = VarioCodec::new();
        codec.set_cell_count(40);
        let packet = codec.read_packet(&mut io).unwrap().expect("one frame back");
        prop_assert_eq!(packet.as_bytes(), &payload[..]);
        prop_assert!(codec.read_packet(&mut io).unwrap().is_none());
    }

    /// Non-escape junk between encoded frames is skipped and the frames
    /// come back verbatim, in order; nothing extra appears.
    #[test]
    fn resync_recovers_frames(
        frames in proptest::collection::vec(frame_strategy(), 1..4),
        junk in proptest::collection::vec(any::<u8>().prop_filter("no escape", |b| *b != ESC), 0..8),
    ) {
        let mut stream = Vec::new();
        stream.extend_from_slice(&junk);
        let mut encoded_frames = Vec::new();
        for frame in &frames {
            let mut io = MockTransport::new();
            VarioCodec::write_packet(&mut io, frame).unwrap();
            let bytes = io.take_written();
            stream.extend_from_slice(&bytes);
            encoded_frames.push(frame.clone());
        }

        let mut io = MockTransport::new();
        io.push_input(&stream);
        let mut codec = VarioCodec::new();
        codec.set_cell_count(40);

        let mut decoded = Vec::new();
        while let Some(packet) = codec.read_packet(&mut io).unwrap() {
            decoded.push(packet.as_bytes().to_vec());
        }
        prop_assert_eq!(decoded, encoded_frames);
    }
}
