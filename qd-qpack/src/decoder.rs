//! Decoder stream, encoder-stream instruction application and blocked-block
//! tracking (RFC 9204 §4.2, §4.4). Mirrors the instruction byte layouts
//! `encoder.rs` writes.

use crate::error::{QpackError, QpackResult};
use crate::huffman;
use crate::table::{static_lookup, DynamicTable};
use crate::varint;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

fn read_string_literal(input: &mut impl Buf) -> QpackResult<String> {
    if !input.has_remaining() {
        return Err(QpackError::MalformedInstruction);
    }
    let first = input.get_u8();
    let huffman_coded = first & 0x80 != 0;
    let len = varint::decode(first & 0x7f, 7, input)?.try_into().map_err(|_| QpackError::MalformedInstruction)?;
    if input.remaining() < len {
        return Err(QpackError::HuffmanTruncated);
    }
    let mut raw = vec![0u8; len];
    input.copy_to_slice(&mut raw);
    let bytes = if huffman_coded {
        huffman::decode(&raw)?
    } else {
        raw
    };
    String::from_utf8(bytes).map_err(|_| QpackError::MalformedInstruction)
}

fn max_entries(capacity: usize) -> u64 {
    (capacity / 32) as u64
}

fn decode_required_insert_count(encoded: u64, capacity: usize, total_insert_count: u64) -> QpackResult<u64> {
    if encoded == 0 {
        return Ok(0);
    }
    let max = max_entries(capacity).max(1);
    let full_range = 2 * max;
    if encoded > full_range {
        return Err(QpackError::MalformedInstruction);
    }
    let max_value = total_insert_count + max;
    let max_wrapped = (max_value / full_range) * full_range;
    let mut ric = max_wrapped + encoded - 1;
    if ric > max_value {
        if ric <= full_range {
            return Err(QpackError::MalformedInstruction);
        }
        ric -= full_range;
    }
    if ric == 0 {
        return Err(QpackError::MalformedInstruction);
    }
    Ok(ric)
}

fn decode_base(sign: bool, delta: u64, ric: u64) -> QpackResult<u64> {
    if !sign {
        Ok(ric + delta)
    } else {
        ric.checked_sub(delta + 1).ok_or(QpackError::MalformedInstruction)
    }
}

struct BlockedBlock {
    stream_id: u64,
    bytes: Bytes,
}

pub struct Decoder {
    dynamic: DynamicTable,
    /// Keyed by the Required Insert Count the block is waiting for.
    blocked: HashMap<u64, Vec<BlockedBlock>>,
}

impl Decoder {
    pub fn new(dynamic_capacity: usize) -> Self {
        Decoder {
            dynamic: DynamicTable::new(dynamic_capacity),
            blocked: HashMap::new(),
        }
    }

    pub fn insert_count(&self) -> u64 {
        self.dynamic.insert_count()
    }

    /// Applies encoder-stream instructions in order, returning any blocks
    /// that are now unblocked (in the order their RIC became satisfied),
    /// each ready to finish decoding with `finish_decode`.
    pub fn apply_encoder_instructions(&mut self, input: &[u8]) -> QpackResult<Vec<(u64, Vec<(String, String)>)>> {
        let mut buf = Bytes::copy_from_slice(input);
        while buf.has_remaining() {
            let first = buf.get_u8();
            if first & 0x80 != 0 {
                // Insert With Name Reference.
                let is_static = first & 0x40 != 0;
                let index = varint::decode(first & 0x3f, 6, &mut buf)?;
                let name = if is_static {
                    static_lookup(index)?.0.to_string()
                } else {
                    self.dynamic.get(index)?.0.to_string()
                };
                let value = read_string_literal(&mut buf)?;
                self.dynamic.insert(name, value)?;
            } else if first & 0x40 != 0 {
                // Insert With Literal Name.
                let huffman_coded = first & 0x20 != 0;
                let name_len: usize = varint::decode(first & 0x1f, 5, &mut buf)?
                    .try_into()
                    .map_err(|_| QpackError::MalformedInstruction)?;
                if buf.remaining() < name_len {
                    return Err(QpackError::MalformedInstruction);
                }
                let mut raw = vec![0u8; name_len];
                buf.copy_to_slice(&mut raw);
                let name_bytes = if huffman_coded { huffman::decode(&raw)? } else { raw };
                let name = String::from_utf8(name_bytes).map_err(|_| QpackError::MalformedInstruction)?;
                let value = read_string_literal(&mut buf)?;
                self.dynamic.insert(name, value)?;
            } else if first & 0x20 != 0 {
                // Set Dynamic Table Capacity (001xxxxx).
                let capacity = varint::decode(first & 0x1f, 5, &mut buf)?;
                self.dynamic.set_capacity(capacity as usize);
            } else {
                // Duplicate (000xxxxx): relative index counted back from insert_count.
                let relative = varint::decode(first & 0x1f, 5, &mut buf)?;
                let absolute = self
                    .dynamic
                    .insert_count()
                    .checked_sub(1 + relative)
                    .ok_or(QpackError::DynamicIndexOutOfRange(relative))?;
                let (name, value) = self.dynamic.get(absolute)?;
                let (name, value) = (name.to_string(), value.to_string());
                self.dynamic.insert(name, value)?;
            }
        }
        self.drain_unblocked()
    }

    fn drain_unblocked(&mut self) -> QpackResult<Vec<(u64, Vec<(String, String)>)>> {
        let mut ready = Vec::new();
        let satisfied: Vec<u64> = self
            .blocked
            .keys()
            .copied()
            .filter(|&ric| ric <= self.dynamic.insert_count())
            .collect();
        for ric in satisfied {
            for block in self.blocked.remove(&ric).unwrap_or_default() {
                let mut buf = block.bytes;
                let decoded = self.decode_base_and_fields(&mut buf, ric)?;
                ready.push((block.stream_id, decoded));
            }
        }
        Ok(ready)
    }

    /// Decodes one header block. Returns `Ok(None)` if the block is blocked
    /// on a not-yet-applied insertion (it is buffered internally and will
    /// surface from a later `apply_encoder_instructions` call).
    pub fn decode_header_block(&mut self, stream_id: u64, input: &[u8]) -> QpackResult<Option<Vec<(String, String)>>> {
        let mut buf = Bytes::copy_from_slice(input);
        if !buf.has_remaining() {
            return Err(QpackError::MalformedInstruction);
        }
        let first = buf.get_u8();
        let encoded_ric = varint::decode(first, 8, &mut buf)?;
        let ric = decode_required_insert_count(encoded_ric, self.dynamic.capacity(), self.dynamic.insert_count())?;

        if ric > self.dynamic.insert_count() {
            self.blocked.entry(ric).or_default().push(BlockedBlock {
                stream_id,
                bytes: buf,
            });
            return Ok(None);
        }

        self.decode_base_and_fields(&mut buf, ric).map(Some)
    }

    /// Reads the Base field (sign + delta) and then every field line,
    /// shared by the immediate-decode and was-blocked-now-ready paths.
    fn decode_base_and_fields(&self, buf: &mut Bytes, ric: u64) -> QpackResult<Vec<(String, String)>> {
        if !buf.has_remaining() {
            return Err(QpackError::MalformedInstruction);
        }
        let base_byte = buf.get_u8();
        let sign = base_byte & 0x80 != 0;
        let delta = varint::decode(base_byte & 0x7f, 7, buf)?;
        let base = decode_base(sign, delta, ric)?;
        self.decode_field_lines(buf, base)
    }

    fn decode_field_lines(&self, buf: &mut Bytes, base: u64) -> QpackResult<Vec<(String, String)>> {
        let mut fields = Vec::new();
        while buf.has_remaining() {
            let first = buf.get_u8();
            if first & 0x80 != 0 {
                let is_static = first & 0x40 != 0;
                let index = varint::decode(first & 0x3f, 6, buf)?;
                let (name, value) = if is_static {
                    let (n, v) = static_lookup(index)?;
                    (n.to_string(), v.to_string())
                } else {
                    let (n, v) = self.dynamic.get(base - 1 - index)?;
                    (n.to_string(), v.to_string())
                };
                fields.push((name, value));
            } else if first & 0x40 != 0 {
                let is_static = first & 0x10 != 0;
                let index = varint::decode(first & 0x0f, 4, buf)?;
                let name = if is_static {
                    static_lookup(index)?.0.to_string()
                } else {
                    self.dynamic.get(base - 1 - index)?.0.to_string()
                };
                let value = read_string_literal(buf)?;
                fields.push((name, value));
            } else if first & 0x20 != 0 {
                let name = read_string_literal(buf)?;
                let value = read_string_literal(buf)?;
                fields.push((name, value));
            } else {
                return Err(QpackError::MalformedInstruction);
            }
        }
        Ok(fields)
    }

    pub fn build_section_acknowledgment(stream_id: u64) -> Vec<u8> {
        let mut out = BytesMut::new();
        varint::encode(stream_id, 7, 0x80, &mut out);
        out.to_vec()
    }

    pub fn build_stream_cancellation(stream_id: u64) -> Vec<u8> {
        let mut out = BytesMut::new();
        varint::encode(stream_id, 6, 0x40, &mut out);
        out.to_vec()
    }

    pub fn build_insert_count_increment(increment: u64) -> Vec<u8> {
        let mut out = BytesMut::new();
        varint::encode(increment, 6, 0x00, &mut out);
        out.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    #[test]
    fn blocked_block_decodes_once_required_insertion_arrives() {
        let mut enc = Encoder::new(4096, 16);
        // ":authority" has a static-table name match, so the encoder
        // inserts (name, "example.org") into the dynamic table and
        // references it -- this is what makes the block blockable.
        let (encoder_stream, block) = enc
            .encode_header_block(0, &[(":authority".into(), "example.org".into())])
            .unwrap();

        let mut dec = Decoder::new(4096);
        // Decode before the insertion is applied: must block.
        assert!(dec.decode_header_block(0, &block).unwrap().is_none());

        let ready = dec.apply_encoder_instructions(&encoder_stream).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, 0);
        assert_eq!(
            ready[0].1,
            vec![(":authority".to_string(), "example.org".to_string())]
        );
    }

    #[test]
    fn decoder_stream_instruction_builders_round_trip_their_prefix() {
        let ack = Decoder::build_section_acknowledgment(42);
        let mut buf = Bytes::copy_from_slice(&ack);
        let first = buf.get_u8();
        assert!(first & 0x80 != 0);
        assert_eq!(varint::decode(first & 0x7f, 7, &mut buf).unwrap(), 42);
    }
}
