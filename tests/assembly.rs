//! Receive-side assembly scenarios: reorder, parameter-set handling and
//! frame batching across packet boundaries, the way the video read loop
//! wires the stages together.

use studio_webrtc::rtp::depacketize::{H264Depacketizer, START_CODE};
use studio_webrtc::rtp::reorder::ReorderQueue;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

fn packet(sequence_number: u16, timestamp: u32, payload: Vec<u8>) -> Packet {
    Packet {
        header: Header {
            version: 2,
            sequence_number,
            timestamp,
            ..Default::default()
        },
        payload: payload.into(),
    }
}

fn stap_a(nalus: &[&[u8]]) -> Vec<u8> {
    let mut payload = vec![24u8];
    for nalu in nalus {
        payload.extend_from_slice(&(nalu.len() as u16).to_be_bytes());
        payload.extend_from_slice(nalu);
    }
    payload
}

fn fu_a(nal_type: u8, start: bool, end: bool, data: &[u8]) -> Vec<u8> {
    let mut header = nal_type & 0x1F;
    if start {
        header |= 0x80;
    }
    if end {
        header |= 0x40;
    }
    let mut payload = vec![0x60 | 28, header];
    payload.extend_from_slice(data);
    payload
}

fn framed(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(part);
    }
    out
}

/// Drain everything that is ready and return the emitted NAL units with
/// their timestamps.
fn drain(queue: &mut ReorderQueue, depacketizer: &mut H264Depacketizer) -> Vec<(Vec<u8>, u32)> {
    let mut emitted = Vec::new();
    while let Some(frame) = queue.pop_frame() {
        for packet in &frame {
            if let Ok(Some(nalu)) = depacketizer.depacketize(&packet.payload) {
                emitted.push((nalu, packet.header.timestamp));
            }
        }
    }
    emitted
}

#[test]
fn parameter_sets_then_idr_then_slice() {
    let sps = [0x67u8, 0x64, 0x00, 0x1F, 0xAC];
    let pps = [0x68u8, 0xEE, 0x3C, 0xB0];
    let idr_head = [0x10u8, 0x20, 0x30];
    let idr_tail = [0x40u8, 0x50];
    let slice = [0x41u8, 0x9A, 0x02];

    let mut queue = ReorderQueue::new();
    let mut depacketizer = H264Depacketizer::new();

    queue.push(packet(10, 900_000, stap_a(&[&sps, &pps])));
    queue.push(packet(11, 900_000, fu_a(5, true, false, &idr_head)));
    queue.push(packet(12, 900_000, fu_a(5, false, true, &idr_tail)));
    assert!(drain(&mut queue, &mut depacketizer).is_empty());

    // The next-timestamp packet completes the first frame.
    queue.push(packet(13, 903_000, slice.to_vec()));
    let emitted = drain(&mut queue, &mut depacketizer);

    assert_eq!(emitted.len(), 1);
    let (nalu, timestamp) = &emitted[0];
    assert_eq!(*timestamp, 900_000);
    // SPS and PPS precede the reassembled IDR, each with a start code.
    assert_eq!(
        *nalu,
        framed(&[&sps, &pps, &[0x65, 0x10, 0x20, 0x30, 0x40, 0x50]])
    );

    // Flush the slice with a later frame: the cache is gone, the slice
    // comes through bare.
    queue.push(packet(14, 906_000, vec![0x41, 0xFF]));
    let emitted = drain(&mut queue, &mut depacketizer);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, framed(&[&slice]));
    assert_eq!(emitted[0].1, 903_000);
}

#[test]
fn reordered_fragments_reassemble_in_sequence_order() {
    let mut queue = ReorderQueue::new();
    let mut depacketizer = H264Depacketizer::new();

    // 100, 102, 101 at one timestamp, then 103 at the next.
    queue.push(packet(100, 5000, fu_a(1, true, false, &[0xAA])));
    queue.push(packet(102, 5000, fu_a(1, false, true, &[0xCC])));
    queue.push(packet(101, 5000, fu_a(1, false, false, &[0xBB])));
    assert!(drain(&mut queue, &mut depacketizer).is_empty());

    queue.push(packet(103, 8000, vec![0x41, 0x00]));
    let emitted = drain(&mut queue, &mut depacketizer);

    // Fragments were consumed as 100, 101, 102.
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, framed(&[&[0x61, 0xAA, 0xBB, 0xCC]]));
}

#[test]
fn malformed_packet_does_not_poison_the_stream() {
    let mut queue = ReorderQueue::new();
    let mut depacketizer = H264Depacketizer::new();

    // Unknown NAL type 25 followed by a good single NAL, same frame.
    queue.push(packet(1, 1000, vec![25u8, 0x01]));
    queue.push(packet(2, 1000, vec![0x41, 0x7F]));
    queue.push(packet(3, 2000, vec![0x41, 0x80]));

    let mut emitted = Vec::new();
    while let Some(frame) = queue.pop_frame() {
        for packet in &frame {
            match depacketizer.depacketize(&packet.payload) {
                Ok(Some(nalu)) => emitted.push(nalu),
                Ok(None) => {}
                Err(_) => {} // dropped, session keeps going
            }
        }
    }

    assert_eq!(emitted, vec![framed(&[&[0x41, 0x7F]])]);
}
