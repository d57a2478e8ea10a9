//! Sequence-number reorder queue with timestamp-batched drain.
//!
//! Fragments of one video frame share an RTP timestamp. The queue keeps
//! incoming packets sorted by sequence number and releases the leading
//! same-timestamp run only once a packet with a different timestamp has
//! arrived behind it, which is the signal that the frame is complete.

use webrtc::rtp::packet::Packet;

#[derive(Default)]
pub struct ReorderQueue {
    packets: Vec<Packet>,
}

impl ReorderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one packet, keeping the queue sorted ascending by sequence
    /// number. The sort is stable, so duplicates keep arrival order.
    pub fn push(&mut self, packet: Packet) {
        self.packets.push(packet);
        self.packets
            .sort_by_key(|p| p.header.sequence_number);
    }

    /// Remove and return the leading run of packets that share the front
    /// packet's timestamp, or `None` while the run may still be growing
    /// (no later-timestamp packet has arrived yet).
    pub fn pop_frame(&mut self) -> Option<Vec<Packet>> {
        let first_timestamp = self.packets.first()?.header.timestamp;

        let run = self
            .packets
            .iter()
            .take_while(|p| p.header.timestamp == first_timestamp)
            .count();

        if run == self.packets.len() {
            return None;
        }

        Some(self.packets.drain(..run).collect())
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::rtp::header::Header;

    fn packet(sequence_number: u16, timestamp: u32) -> Packet {
        Packet {
            header: Header {
                version: 2,
                sequence_number,
                timestamp,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_out_of_order_packets_are_released_in_order() {
        let mut queue = ReorderQueue::new();
        queue.push(packet(100, 7000));
        queue.push(packet(102, 7000));
        queue.push(packet(101, 7000));

        // Run may still be growing, nothing to release yet.
        assert!(queue.pop_frame().is_none());

        queue.push(packet(103, 10000));
        let frame = queue.pop_frame().unwrap();
        let seqs: Vec<u16> = frame.iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs, vec![100, 101, 102]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_batch_sequence_numbers_strictly_increase() {
        let mut queue = ReorderQueue::new();
        for seq in [5u16, 9, 7, 6, 8] {
            queue.push(packet(seq, 1000));
        }
        queue.push(packet(10, 2000));

        let frame = queue.pop_frame().unwrap();
        for pair in frame.windows(2) {
            assert!(pair[0].header.sequence_number < pair[1].header.sequence_number);
        }
    }

    #[test]
    fn test_drained_timestamps_are_non_decreasing() {
        let mut queue = ReorderQueue::new();
        queue.push(packet(1, 1000));
        queue.push(packet(2, 1000));
        queue.push(packet(3, 4000));
        queue.push(packet(4, 4000));
        queue.push(packet(5, 9000));

        let mut released = Vec::new();
        while let Some(frame) = queue.pop_frame() {
            released.extend(frame.iter().map(|p| p.header.timestamp));
        }

        assert_eq!(released, vec![1000, 1000, 4000, 4000]);
        // The trailing ts=9000 packet stays queued until a newer frame shows up.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_empty_queue_yields_nothing() {
        let mut queue = ReorderQueue::new();
        assert!(queue.pop_frame().is_none());
        assert!(queue.is_empty());
    }
}
