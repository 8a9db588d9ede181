use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum FramerError {
    BufferGrowth { requested: usize },
}

impl fmt::Display for FramerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferGrowth { requested } => write!(
                f,
                "failed to grow packet buffer by {requested} bytes"
            ),
        }
    }
}

impl std::error::Error for FramerError {}

/// Accumulates raw receive bytes and extracts complete newline-terminated
/// packets. The buffer grows without bound; growth failure is fatal to the
/// owning session only, never to the process.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buffer: Vec<u8>,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `raw` to the internal buffer and yields every complete packet
    /// (newline inclusive) found, in arrival order. A single call may yield
    /// zero, one, or many packets.
    pub fn feed(&mut self, raw: &[u8]) -> Result<Vec<Vec<u8>>, FramerError> {
        self.buffer
            .try_reserve(raw.len())
            .map_err(|_| FramerError::BufferGrowth {
                requested: raw.len(),
            })?;
        self.buffer.extend_from_slice(raw);

        let mut packets = Vec::new();
        while let Some(newline_index) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let packet: Vec<u8> = self.buffer.drain(..=newline_index).collect();
            packets.push(packet);
        }

        Ok(packets)
    }

    /// Bytes buffered without a terminating newline yet.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::PacketFramer;

    #[test]
    fn partial_bytes_yield_nothing_and_stay_buffered() {
        let mut framer = PacketFramer::new();

        let packets = framer.feed(b"partial").expect("feed should work");
        assert!(packets.is_empty());
        assert_eq!(framer.pending_len(), 7);
    }

    #[test]
    fn completes_a_packet_split_across_feeds() {
        let mut framer = PacketFramer::new();

        assert!(framer.feed(b"hel").expect("feed should work").is_empty());
        let packets = framer.feed(b"lo\n").expect("feed should work");

        assert_eq!(packets, vec![b"hello\n".to_vec()]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn one_burst_with_many_newlines_yields_all_packets_in_order() {
        let mut framer = PacketFramer::new();

        let packets = framer
            .feed(b"one\ntwo\nthree\ntail")
            .expect("feed should work");

        assert_eq!(
            packets,
            vec![b"one\n".to_vec(), b"two\n".to_vec(), b"three\n".to_vec()]
        );
        assert_eq!(framer.pending_len(), 4);
    }

    #[test]
    fn trailing_bytes_carry_over_into_the_next_packet() {
        let mut framer = PacketFramer::new();

        framer.feed(b"ab\ncd").expect("feed should work");
        let packets = framer.feed(b"ef\n").expect("feed should work");

        assert_eq!(packets, vec![b"cdef\n".to_vec()]);
    }

    #[test]
    fn empty_packet_is_a_lone_newline() {
        let mut framer = PacketFramer::new();

        let packets = framer.feed(b"\n").expect("feed should work");
        assert_eq!(packets, vec![b"\n".to_vec()]);
    }
}
