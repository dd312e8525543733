//! Buffers out-of-order byte substrings and commits the contiguous
//! prefix into an inbound [`ByteStream`] as soon as it becomes
//! available.

use std::collections::BTreeMap;

use super::byte_stream::ByteStream;

#[derive(Debug)]
pub struct Reassembler {
    output: ByteStream,
    /// Disjoint pending intervals keyed by absolute start index. The
    /// invariant "no two stored intervals overlap" is maintained by
    /// `merge_insert` on every call.
    pending: BTreeMap<u64, Vec<u8>>,
    /// First index just past the last byte of the stream, once a final
    /// marker has arrived.
    last_index: Option<u64>,
}

impl Reassembler {
    pub fn new(output: ByteStream) -> Self {
        Reassembler {
            output,
            pending: BTreeMap::new(),
            last_index: None,
        }
    }

    pub fn insert(&mut self, first_index: u64, data: &[u8], is_last: bool) {
        let u = self.output.bytes_pushed();
        let w = self.output.available_capacity() as u64;

        if is_last && first_index + data.len() as u64 <= u {
            self.output.close();
            return;
        }

        if w == 0 || (data.is_empty() && !is_last) {
            return;
        }

        let mut start = first_index;
        let mut bytes = data;

        if start < u {
            let drop = std::cmp::min((u - start) as usize, bytes.len());
            bytes = &bytes[drop..];
            start = u;
        }

        let window_end = u + w;
        if start >= window_end {
            bytes = &[];
        } else {
            let room = (window_end - start) as usize;
            if bytes.len() > room {
                bytes = &bytes[..room];
            }
        }

        if is_last {
            self.last_index = Some(start + bytes.len() as u64);
        }

        if !bytes.is_empty() {
            self.merge_insert(start, bytes);
        }

        self.drain_contiguous();

        if let Some(last) = self.last_index {
            if self.output.bytes_pushed() == last {
                self.output.close();
            }
        }
    }

    /// Merges `[start, start+bytes.len())` into the pending interval set
    /// so that no two stored intervals overlap. Where a newly arrived
    /// byte overlaps one already stored, the stored byte wins (it
    /// arrived first).
    fn merge_insert(&mut self, start: u64, bytes: &[u8]) {
        let end = start + bytes.len() as u64;

        let mut final_start = start;
        let mut final_end = end;
        let mut overlapping = Vec::new();

        for (&ex_start, ex_data) in self.pending.iter() {
            let ex_end = ex_start + ex_data.len() as u64;
            if ex_start < end && ex_end > start {
                final_start = final_start.min(ex_start);
                final_end = final_end.max(ex_end);
                overlapping.push(ex_start);
            }
        }

        let mut merged = vec![0u8; (final_end - final_start) as usize];

        let off = (start - final_start) as usize;
        merged[off..off + bytes.len()].copy_from_slice(bytes);

        for ex_start in overlapping {
            let ex_data = self.pending.remove(&ex_start).unwrap();
            let off = (ex_start - final_start) as usize;
            merged[off..off + ex_data.len()].copy_from_slice(&ex_data);
        }

        self.pending.insert(final_start, merged);
    }

    fn drain_contiguous(&mut self) {
        while let Some(&start) = self.pending.keys().next() {
            if start != self.output.bytes_pushed() {
                break;
            }
            let data = self.pending.remove(&start).unwrap();
            self.output.push(&data);
        }
    }

    pub fn bytes_pending(&self) -> u64 {
        self.pending.values().map(|v| v.len() as u64).sum()
    }

    pub fn is_finished(&self) -> bool {
        self.output.is_finished()
    }

    pub fn reader(&self) -> &ByteStream {
        &self.output
    }

    pub fn writer(&mut self) -> &mut ByteStream {
        &mut self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler(capacity: usize) -> Reassembler {
        Reassembler::new(ByteStream::new(capacity))
    }

    #[test]
    fn out_of_order_insert_then_close() {
        let mut r = reassembler(1000);
        r.insert(3, b"def", false);
        assert_eq!(r.reader().bytes_pushed(), 0);
        assert_eq!(r.bytes_pending(), 3);

        r.insert(0, b"abc", false);
        assert_eq!(r.reader().peek(), b"abcdef");
        assert_eq!(r.bytes_pending(), 0);

        r.insert(6, b"", true);
        assert!(r.reader().is_closed());
        assert!(r.is_finished());
    }

    #[test]
    fn overlapping_duplicate_keeps_first_arrival() {
        let mut r = reassembler(1000);
        // Arrives first, far ahead of the frontier (still at 0), so it
        // stays pending rather than draining immediately.
        r.insert(5, b"FGHIJ", false);
        assert_eq!(r.bytes_pending(), 5);

        // Overlaps positions 5..8 with different bytes; those positions
        // must keep the first arrival's data, not the duplicate's.
        r.insert(3, b"XXXXX", false);
        assert_eq!(r.reader().peek(), b"");
        assert_eq!(r.bytes_pending(), 7);

        // Filling the gap drains everything at once: positions 5..10
        // come out as "FGHIJ", never clobbered by the duplicate.
        r.insert(0, b"abc", false);
        assert_eq!(r.reader().peek(), b"abcXXFGHIJ");
        assert_eq!(r.bytes_pending(), 0);

        r.insert(10, b"", true);
        assert!(r.reader().is_closed());
    }

    #[test]
    fn bytes_beyond_window_are_dropped() {
        let mut r = reassembler(2);
        r.insert(0, b"ab", false);
        // window is now [2, 4); anything beyond is dropped, not buffered.
        r.insert(2, b"cdef", false);
        assert_eq!(r.bytes_pending(), 0);
        assert_eq!(r.reader().peek(), b"ab");
    }

    #[test]
    fn last_marker_waits_for_contiguous_prefix() {
        let mut r = reassembler(100);
        // FIN arrives before the data that completes the stream.
        r.insert(3, b"", true);
        assert!(!r.reader().is_closed());
        r.insert(0, b"abc", false);
        assert!(r.reader().is_closed());
    }
}
