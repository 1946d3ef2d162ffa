//! End-to-end inbound pipeline, without hardware: serial bytes as the
//! dongle would emit them, through frame decoding, event decoding, and
//! channel decryption.

use meshtastic_packet::{proto::PortNum, Channel};
use wslora_radio_protocol::{encode_frame, Event, Frame, FrameDecoder, MSG_PACKET_RECEIVED};

/// The captured broadcast text message on the default channel.
const CAPTURED_TEXT_PACKET: &[u8] = &[
    0xff, 0xff, 0xff, 0xff, 0x44, 0x33, 0x22, 0x11, 0x5f, 0xb1, 0x3e, 0xfb, 0xe7, 0x08, 0x00,
    0x00, 0x7d, 0x7f, 0xa9, 0x49, 0x1a, 0xd1, 0x39, 0xf4, 0xf9, 0xf3, 0x57, 0x5b, 0x83, 0x05,
    0x4d, 0xa6, 0xdb, 0x2c, 0x25, 0xa8, 0x82, 0x25, 0x5f, 0xa4, 0x7e, 0x91, 0x9f, 0xff, 0x39,
];

#[test]
fn dongle_bytes_to_text_message() {
    // Dongle-side: a PacketReceived event frame with RX metadata
    // (-88 dBm, 6 dB SNR, -82 dBm signal) and the raw packet.
    let mut payload = vec![0xA8, 0x06, 0xAE];
    payload.extend_from_slice(CAPTURED_TEXT_PACKET);
    let wire = encode_frame(&Frame::new(MSG_PACKET_RECEIVED, payload)).unwrap();

    // Host-side: frame decoding survives arbitrary chunking.
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in wire.chunks(7) {
        decoder.push(chunk);
        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }
    }
    assert_eq!(frames.len(), 1);

    // Event decoding.
    let event = Event::decode(&frames[0]).unwrap();
    let Event::PacketReceived {
        packet_rssi_dbm,
        snr_db,
        data,
        ..
    } = event
    else {
        panic!("expected a PacketReceived event");
    };
    assert_eq!(packet_rssi_dbm, -88);
    assert_eq!(snr_db, 6);

    // Channel decryption on the default channel.
    let packet = Channel::default_channel().decode(&data).unwrap();
    assert!(packet.is_broadcast());
    assert_eq!(packet.from, 0x1122_3344);
    assert_eq!(packet.data.port(), PortNum::TextMessageApp);
    assert_eq!(packet.data.payload, b"Hello from Waveshare USB!");
}

#[test]
fn foreign_channel_traffic_is_rejected_cheaply() {
    let private = Channel::new(1, "Backbone", [0x11; 16]);
    let err = private.decode(CAPTURED_TEXT_PACKET).unwrap_err();
    assert!(matches!(
        err,
        meshtastic_packet::PacketError::ChannelMismatch { actual: 0x08, .. }
    ));
}
