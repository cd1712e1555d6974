//! RFC 7692 permessage-deflate: an inflater/deflater pair, each optionally
//! resetting its sliding window between messages ("no context takeover").

use bytes::{Bytes, BytesMut};
use flate2::{Decompress, FlushDecompress};

use crate::error::Error;

/// The four trailing bytes RFC 7692 §7.2.1 strips from a compressed message
/// before inflating (an empty-block DEFLATE marker the sender re-appends).
const TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

pub(crate) struct Inflater {
    decompress: Decompress,
    no_context_takeover: bool,
}

impl Inflater {
    pub(crate) fn new(no_context_takeover: bool) -> Self {
        Inflater { decompress: Decompress::new(false), no_context_takeover }
    }

    /// Inflates one complete message's RSV1-flagged payload (already
    /// reassembled from its fragments, with the trailing marker restored).
    pub(crate) fn inflate(&mut self, compressed: &Bytes) -> Result<Bytes, Error> {
        let mut input = BytesMut::from(&compressed[..]);
        input.extend_from_slice(&TAIL);

        let start_in = self.decompress.total_in();
        let start_out = self.decompress.total_out();
        let mut out = BytesMut::new();
        let mut chunk = vec![0u8; (compressed.len() * 3).max(4096)];
        loop {
            let consumed_so_far = (self.decompress.total_in() - start_in) as usize;
            let produced_so_far = (self.decompress.total_out() - start_out) as usize;
            let status = self
                .decompress
                .decompress(&input[consumed_so_far..], &mut chunk, FlushDecompress::Sync)
                .map_err(Error::protocol)?;
            let produced_this_call = (self.decompress.total_out() - start_out) as usize - produced_so_far;
            out.extend_from_slice(&chunk[..produced_this_call]);

            let all_input_consumed = (self.decompress.total_in() - start_in) as usize >= input.len();
            let chunk_full = produced_this_call == chunk.len();
            if matches!(status, flate2::Status::StreamEnd) || (all_input_consumed && !chunk_full) {
                break;
            }
            if chunk_full {
                chunk.resize(chunk.len() * 2, 0);
            }
        }

        if self.no_context_takeover {
            self.decompress.reset(false);
        }
        Ok(out.freeze())
    }
}

pub(crate) struct Deflater {
    compress: flate2::Compress,
    no_context_takeover: bool,
}

impl Deflater {
    pub(crate) fn new(no_context_takeover: bool) -> Self {
        Deflater {
            compress: flate2::Compress::new(flate2::Compression::default(), false),
            no_context_takeover,
        }
    }

    /// Deflates one message payload and strips the trailing empty-block
    /// marker RFC 7692 §7.2.1 requires senders to omit.
    pub(crate) fn deflate(&mut self, payload: &Bytes) -> Result<Bytes, Error> {
        let mut out = BytesMut::with_capacity(payload.len());
        out.resize(payload.len().max(64) + 64, 0);
        let before_out = self.compress.total_out();
        self.compress
            .compress(payload, &mut out, flate2::FlushCompress::Sync)
            .map_err(Error::protocol)?;
        let produced = (self.compress.total_out() - before_out) as usize;
        out.truncate(produced);

        if out.ends_with(&TAIL) {
            let new_len = out.len() - TAIL.len();
            out.truncate(new_len);
        }

        if self.no_context_takeover {
            self.compress.reset();
        }
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_then_inflate_round_trips() {
        let mut deflater = Deflater::new(false);
        let mut inflater = Inflater::new(false);
        let message = Bytes::from_static(b"the quick brown fox jumps over the lazy dog, repeatedly, repeatedly");
        let compressed = deflater.deflate(&message).unwrap();
        let restored = inflater.inflate(&compressed).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn no_context_takeover_still_round_trips_each_message_independently() {
        let mut deflater = Deflater::new(true);
        let mut inflater = Inflater::new(true);
        for msg in ["first message", "second, unrelated message"] {
            let payload = Bytes::from(msg.as_bytes().to_vec());
            let compressed = deflater.deflate(&payload).unwrap();
            let restored = inflater.inflate(&compressed).unwrap();
            assert_eq!(restored, payload);
        }
    }
}
