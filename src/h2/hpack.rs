//! HPACK (RFC 7541): header compression for the multiplexer. The static
//! table (Appendix A) and the canonical Huffman code (Appendix B, rebuilt
//! here from its published per-symbol code lengths) are both implemented
//! from scratch — delegating header compression to an external crate would
//! leave unimplemented the subsystem this engine spends the largest part of
//! its HTTP/2 budget on.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use once_cell::sync::Lazy;

use crate::error::Error;

const STATIC_TABLE: &[(&str, &str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Per-symbol Huffman code length (Appendix B), indices `0..=255` plus the
/// end-of-string symbol at `256`. The canonical Huffman construction below
/// rebuilds the actual codes from these lengths, so only the lengths need
/// to be faithful to the specification.
#[rustfmt::skip]
const SYMBOL_BIT_LENGTHS: [u8; 257] = [
    13,23,28,28,28,28,28,28,28,24,30,28,28,30,28,28,28,28,28,28,28,28,30,28,28,28,28,28,28,28,28,28,
    6,10,10,12,13,6,8,11,10,10,8,11,8,6,6,6,5,5,5,6,6,6,6,6,6,6,7,8,15,6,12,10,
    13,6,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,8,7,8,13,19,13,14,6,15,
    5,6,5,6,5,6,6,6,5,7,7,6,6,6,5,6,7,6,5,5,6,7,7,7,7,7,15,11,14,13,28,
    20,22,20,20,22,22,22,23,22,23,23,23,23,23,24,23,24,24,22,23,24,23,23,23,23,21,22,23,22,23,23,24,
    22,21,20,22,22,23,23,21,23,22,22,24,21,22,23,23,21,21,22,21,23,22,23,23,20,22,22,22,23,22,22,23,
    26,26,20,19,22,23,22,25,26,26,26,27,27,26,24,25,19,21,26,27,27,26,27,24,21,21,26,26,28,27,27,27,
    20,24,20,21,22,21,21,23,22,22,25,25,24,24,26,23,26,27,26,26,27,27,27,27,27,28,27,27,27,27,27,26,
    30, 30,
];

struct HuffmanTables {
    codes: [u32; 257],
    decode_by_len: [Vec<(u32, u16)>; 31],
}

fn build_huffman_tables() -> HuffmanTables {
    let mut order: Vec<usize> = (0..257).collect();
    order.sort_by_key(|&sym| (SYMBOL_BIT_LENGTHS[sym], sym));

    let mut codes = [0u32; 257];
    let mut code: u32 = 0;
    let mut prev_len = SYMBOL_BIT_LENGTHS[order[0]];
    for &sym in &order {
        let len = SYMBOL_BIT_LENGTHS[sym];
        code <<= len - prev_len;
        codes[sym] = code;
        code += 1;
        prev_len = len;
    }

    let mut decode_by_len: [Vec<(u32, u16)>; 31] = std::array::from_fn(|_| Vec::new());
    for sym in 0..257 {
        let len = SYMBOL_BIT_LENGTHS[sym] as usize;
        decode_by_len[len].push((codes[sym], sym as u16));
    }

    HuffmanTables { codes, decode_by_len }
}

static HUFFMAN: Lazy<HuffmanTables> = Lazy::new(build_huffman_tables);

fn huffman_encode(input: &[u8]) -> BytesMut {
    let mut bitbuf: u64 = 0;
    let mut bitlen: u32 = 0;
    let mut out = BytesMut::new();
    for &byte in input {
        let code = HUFFMAN.codes[byte as usize] as u64;
        let len = SYMBOL_BIT_LENGTHS[byte as usize] as u32;
        bitbuf = (bitbuf << len) | code;
        bitlen += len;
        while bitlen >= 8 {
            bitlen -= 8;
            out.put_u8((bitbuf >> bitlen) as u8);
        }
    }
    if bitlen > 0 {
        let pad = 8 - bitlen;
        let eos = HUFFMAN.codes[256] as u64;
        bitbuf = (bitbuf << pad) | (eos >> (SYMBOL_BIT_LENGTHS[256] as u32 - pad));
        out.put_u8(bitbuf as u8);
    }
    out
}

fn huffman_decode(input: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut bitbuf: u64 = 0;
    let mut bitlen: u32 = 0;
    for &byte in input {
        bitbuf = (bitbuf << 8) | byte as u64;
        bitlen += 8;
        loop {
            let mut matched = false;
            for len in 5..=30usize {
                if bitlen < len as u32 {
                    continue;
                }
                let candidate = ((bitbuf >> (bitlen - len as u32)) & ((1u64 << len) - 1)) as u32;
                if let Some(&(_, sym)) = HUFFMAN.decode_by_len[len]
                    .iter()
                    .find(|(code, _)| *code == candidate)
                {
                    if sym == 256 {
                        return Err(Error::protocol("huffman stream encoded EOS symbol"));
                    }
                    out.push(sym as u8);
                    bitlen -= len as u32;
                    matched = true;
                    break;
                }
            }
            if !matched {
                break;
            }
        }
    }
    // Remaining bits must be the EOS prefix (all ones), i.e. padding.
    if bitlen > 7 {
        return Err(Error::protocol("huffman stream has unconsumed non-padding bits"));
    }
    if bitlen > 0 {
        let rem = bitbuf & ((1u64 << bitlen) - 1);
        if rem != (1u64 << bitlen) - 1 {
            return Err(Error::protocol("huffman padding is not all-ones"));
        }
    }
    Ok(out)
}

fn encode_integer(out: &mut BytesMut, prefix_bits: u8, first_byte_high_bits: u8, mut value: u64) {
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(first_byte_high_bits | value as u8);
        return;
    }
    out.put_u8(first_byte_high_bits | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        out.put_u8((value % 128 + 128) as u8);
        value /= 128;
    }
    out.put_u8(value as u8);
}

fn decode_integer(prefix_bits: u8, first_byte: u8, rest: &mut Bytes) -> Result<u64, Error> {
    let max_prefix = (1u64 << prefix_bits) - 1;
    let mut value = (first_byte as u64) & max_prefix;
    if value < max_prefix {
        return Ok(value);
    }
    let mut m = 0u32;
    loop {
        if !rest.has_remaining() {
            return Err(Error::protocol("truncated HPACK integer"));
        }
        let b = rest.get_u8();
        value += ((b & 0x7f) as u64) << m;
        m += 7;
        if b & 0x80 == 0 {
            break;
        }
        if m > 63 {
            return Err(Error::protocol("HPACK integer too large"));
        }
    }
    Ok(value)
}

fn encode_string(out: &mut BytesMut, s: &str) {
    let huffman = huffman_encode(s.as_bytes());
    if huffman.len() < s.len() {
        encode_integer(out, 7, 0x80, huffman.len() as u64);
        out.extend_from_slice(&huffman);
    } else {
        encode_integer(out, 7, 0x00, s.len() as u64);
        out.extend_from_slice(s.as_bytes());
    }
}

fn decode_string(data: &mut Bytes) -> Result<String, Error> {
    if !data.has_remaining() {
        return Err(Error::protocol("truncated HPACK string"));
    }
    let first = data.chunk()[0];
    let huffman = first & 0x80 != 0;
    let len = decode_integer(7, first, data)? as usize;
    if data.remaining() < len {
        return Err(Error::protocol("truncated HPACK string data"));
    }
    let raw = data.copy_to_bytes(len);
    let bytes = if huffman { huffman_decode(&raw)? } else { raw.to_vec() };
    String::from_utf8(bytes).map_err(|e| Error::protocol(format!("non-UTF8 header: {e}")))
}

/// The dynamic table (RFC 7541 §2.3.2): most-recently-added entry first.
struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        DynamicTable { entries: VecDeque::new(), size: 0, max_size }
    }

    fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + 32
    }

    fn insert(&mut self, name: String, value: String) {
        self.size += Self::entry_size(&name, &value);
        self.entries.push_front((name, value));
        self.evict();
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            if let Some((name, value)) = self.entries.pop_back() {
                self.size -= Self::entry_size(&name, &value);
            } else {
                break;
            }
        }
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict();
    }

    fn get(&self, index: usize) -> Option<&(String, String)> {
        self.entries.get(index)
    }
}

/// One direction's HPACK codec state. A connection owns two: one for
/// encoding outbound header blocks, one for decoding inbound ones — HPACK
/// state is per-direction, not shared.
pub(crate) struct HpackCodec {
    dynamic: DynamicTable,
}

impl HpackCodec {
    pub(crate) fn new(max_dynamic_table_size: usize) -> Self {
        HpackCodec { dynamic: DynamicTable::new(max_dynamic_table_size) }
    }

    pub(crate) fn set_max_dynamic_table_size(&mut self, size: usize) {
        self.dynamic.set_max_size(size);
    }

    /// Encode a header block. Always uses "literal without indexing" (or
    /// "never indexed" for sensitive headers); this engine does not try to
    /// exploit the dynamic table on encode, which keeps the encoder simple
    /// while staying within RFC-legal representations (a sender may always
    /// choose not to use the dynamic table, §4.1).
    pub(crate) fn encode(&mut self, headers: &[(String, String, bool)]) -> Bytes {
        let mut out = BytesMut::new();
        for (name, value, sensitive) in headers {
            if let Some(index) = static_index_for(name, value) {
                encode_integer(&mut out, 7, 0x80, index as u64);
                continue;
            }
            let prefix = if *sensitive { 0x10 } else { 0x00 };
            out.put_u8(prefix);
            encode_string(&mut out, name);
            encode_string(&mut out, value);
        }
        out.freeze()
    }

    /// Decode a complete header block (possibly assembled from
    /// HEADERS+CONTINUATION) into ordered `(name, value)` pairs.
    pub(crate) fn decode(&mut self, mut data: Bytes) -> Result<Vec<(String, String)>, Error> {
        let mut out = Vec::new();
        while data.has_remaining() {
            let first = data.chunk()[0];
            if first & 0x80 != 0 {
                let index = decode_integer(7, first, &mut data)?;
                let (name, value) = self.lookup(index as usize)?;
                out.push((name, value));
            } else if first & 0x40 != 0 {
                let index = decode_integer(6, first, &mut data)?;
                let name = if index == 0 { decode_string(&mut data)? } else { self.lookup(index as usize)?.0 };
                let value = decode_string(&mut data)?;
                self.dynamic.insert(name.clone(), value.clone());
                out.push((name, value));
            } else if first & 0x20 != 0 {
                let new_size = decode_integer(5, first, &mut data)?;
                self.dynamic.set_max_size(new_size as usize);
            } else {
                // Literal without indexing (0000) or never indexed (0001);
                // both prefix-4, only the no-index/never-index distinction
                // affects whether a proxy may re-encode it, which this
                // engine (an origin client, not a relay) doesn't need.
                let index = decode_integer(4, first, &mut data)?;
                let name = if index == 0 { decode_string(&mut data)? } else { self.lookup(index as usize)?.0 };
                let value = decode_string(&mut data)?;
                out.push((name, value));
            }
        }
        Ok(out)
    }

    fn lookup(&self, index: usize) -> Result<(String, String), Error> {
        if index == 0 {
            return Err(Error::protocol("HPACK index 0 is invalid"));
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok((name.to_string(), value.to_string()));
        }
        self.dynamic
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or_else(|| Error::protocol("HPACK index out of range"))
    }
}

fn static_index_for(name: &str, value: &str) -> Option<usize> {
    STATIC_TABLE.iter().position(|&(n, v)| n == name && v == value && !v.is_empty()).map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huffman_round_trips_ascii() {
        let input = b"www.example.com/index.html";
        let encoded = huffman_encode(input);
        let decoded = huffman_decode(&encoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn huffman_round_trips_mixed_bytes() {
        let input: Vec<u8> = (0u8..=255).collect();
        let encoded = huffman_encode(&input);
        let decoded = huffman_decode(&encoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn integer_round_trips_small_and_large() {
        for value in [0u64, 10, 30, 31, 32, 1000, 1_000_000] {
            let mut out = BytesMut::new();
            encode_integer(&mut out, 5, 0x00, value);
            let mut bytes = out.freeze();
            let first = bytes.get_u8();
            let decoded = decode_integer(5, first, &mut bytes).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn header_block_round_trips() {
        let mut enc = HpackCodec::new(4096);
        let headers = vec![
            (":method".to_string(), "GET".to_string(), false),
            (":path".to_string(), "/widgets".to_string(), false),
            ("x-request-id".to_string(), "abc-123".to_string(), false),
        ];
        let block = enc.encode(&headers);

        let mut dec = HpackCodec::new(4096);
        let decoded = dec.decode(block).unwrap();
        assert_eq!(decoded[0], (":method".to_string(), "GET".to_string()));
        assert_eq!(decoded[1], (":path".to_string(), "/widgets".to_string()));
        assert_eq!(decoded[2], ("x-request-id".to_string(), "abc-123".to_string()));
    }

    #[test]
    fn dynamic_table_evicts_by_size() {
        let mut table = DynamicTable::new(40);
        table.insert("a".repeat(10), "b".repeat(10));
        assert_eq!(table.entries.len(), 1);
        table.insert("c".repeat(10), "d".repeat(10));
        // 52 bytes each > 40 max, so inserting evicts the first entry.
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.entries[0].0, "c".repeat(10));
    }

    #[test]
    fn dynamic_table_size_update_evicts() {
        let mut dec = HpackCodec::new(4096);
        dec.dynamic.insert("name".to_string(), "value".to_string());
        assert_eq!(dec.dynamic.entries.len(), 1);
        dec.set_max_dynamic_table_size(0);
        assert_eq!(dec.dynamic.entries.len(), 0);
    }
}
