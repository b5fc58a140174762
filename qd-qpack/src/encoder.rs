//! Encoder stream, header block assembly and the encoder-side dynamic
//! table bookkeeping. Field representation follows a static-match, then
//! static-name-with-literal-value, then dynamic-match, then
//! dynamic-name-with-literal-value, then literal-literal preference order;
//! instruction byte layouts follow RFC 9204 §4.3 (encoder stream) and §4.5
//! (header block) directly, since those layouts are exact wire contracts.

use crate::error::QpackResult;
use crate::huffman;
use crate::table::DynamicTable;
use crate::varint;
use bytes::{BufMut, BytesMut};
use std::collections::{HashMap, HashSet};

fn write_string_literal(value: &str, out: &mut BytesMut) {
    let bytes = value.as_bytes();
    if huffman::should_huffman_encode(bytes) {
        let encoded = huffman::encode(bytes);
        varint::encode(encoded.len() as u64, 7, 0x80, out);
        out.put_slice(&encoded);
    } else {
        varint::encode(bytes.len() as u64, 7, 0x00, out);
        out.put_slice(bytes);
    }
}

/// Max entries per RFC 9204 §4.5.1.1, used only to fold the Required
/// Insert Count into the small modulo space the header block prefix uses.
fn max_entries(capacity: usize) -> u64 {
    (capacity / 32) as u64
}

fn encode_required_insert_count(ric: u64, capacity: usize, out: &mut BytesMut) {
    let encoded = if ric == 0 {
        0
    } else {
        let max = max_entries(capacity).max(1);
        (ric % (2 * max)) + 1
    };
    varint::encode(encoded, 8, 0x00, out);
}

fn encode_base(ric: u64, base: u64, out: &mut BytesMut) {
    if base >= ric {
        varint::encode(base - ric, 7, 0x00, out);
    } else {
        varint::encode(ric - base - 1, 7, 0x80, out);
    }
}

/// Per-stream bookkeeping so a Section Acknowledgment or Stream
/// Cancellation knows which dynamic-table refs to release.
#[derive(Debug, Default)]
struct StreamRefs {
    blocks: Vec<Vec<u64>>,
}

pub struct Encoder {
    dynamic: DynamicTable,
    known_received_count: u64,
    blocked_streams_limit: usize,
    outstanding: HashMap<u64, StreamRefs>,
}

impl Encoder {
    pub fn new(dynamic_capacity: usize, blocked_streams_limit: usize) -> Self {
        Encoder {
            dynamic: DynamicTable::new(dynamic_capacity),
            known_received_count: 0,
            blocked_streams_limit,
            outstanding: HashMap::new(),
        }
    }

    pub fn dynamic_table(&self) -> &DynamicTable {
        &self.dynamic
    }

    fn currently_blocked_streams(&self) -> usize {
        self.outstanding
            .values()
            .filter(|refs| {
                refs.blocks
                    .iter()
                    .flatten()
                    .any(|&idx| idx >= self.known_received_count)
            })
            .count()
    }

    /// Encodes one header block for `stream_id`. Returns `(encoder_stream,
    /// header_block)`: bytes to append to the encoder stream (possibly
    /// empty, if no new entry was inserted) and the header block itself,
    /// ready to carry in an HTTP/3 HEADERS frame.
    pub fn encode_header_block(
        &mut self,
        stream_id: u64,
        fields: &[(String, String)],
    ) -> QpackResult<(Vec<u8>, Vec<u8>)> {
        let mut encoder_stream = BytesMut::new();
        let mut field_lines = BytesMut::new();
        let mut referenced = Vec::new();
        let mut max_ref: Option<u64> = None;

        for (name, value) in fields {
            let idx = self.encode_field(stream_id, name, value, &mut encoder_stream, &mut field_lines)?;
            if let Some(idx) = idx {
                referenced.push(idx);
                max_ref = Some(max_ref.map_or(idx, |m: u64| m.max(idx)));
            }
        }

        // Base is fixed *after* this block's own insertions, so any entry
        // this same block just inserted is a pre-base reference like any
        // other -- the encoder never needs post-base indexing.
        let base = self.dynamic.insert_count();
        let ric = max_ref.map(|m| m + 1).unwrap_or(0);
        let mut prefix = BytesMut::new();
        encode_required_insert_count(ric, self.dynamic.capacity(), &mut prefix);
        encode_base(ric, base, &mut prefix);

        if !referenced.is_empty() {
            self.outstanding
                .entry(stream_id)
                .or_default()
                .blocks
                .push(referenced);
        }

        let mut header_block = prefix;
        header_block.unsplit(field_lines);
        Ok((encoder_stream.to_vec(), header_block.to_vec()))
    }

    /// Implements the five-way preference order: exact static, exact
    /// dynamic, name-only static, name-only dynamic, literal. Returns the
    /// absolute dynamic index referenced, if any, so the caller can track
    /// it for blocking-budget and acknowledgment purposes.
    fn encode_field(
        &mut self,
        stream_id: u64,
        name: &str,
        value: &str,
        encoder_stream: &mut BytesMut,
        field_lines: &mut BytesMut,
    ) -> QpackResult<Option<u64>> {
        if let Some(idx) = crate::table::static_find_exact(name, value) {
            // Indexed Field Line, static (1Txxxxxx, T=1).
            varint::encode(idx, 6, 0xc0, field_lines);
            return Ok(None);
        }
        if let Some(idx) = self.dynamic.find_exact(name, value) {
            self.dynamic.add_ref(idx)?;
            // Indexed Field Line, dynamic (1Txxxxxx, T=0).
            varint::encode(idx, 6, 0x80, field_lines);
            return Ok(Some(idx));
        }

        let may_block_more = self.currently_blocked_streams() < self.blocked_streams_limit;

        if let Some(idx) = crate::table::static_find_name(name) {
            if may_block_more {
                if let Ok(new_idx) = self.dynamic.insert(name.to_string(), value.to_string()) {
                    // Insert With Name Reference, static (1Txxxxxx, T=1).
                    varint::encode(idx, 6, 0xc0, encoder_stream);
                    write_string_literal(value, encoder_stream);
                    self.dynamic.add_ref(new_idx)?;
                    varint::encode(new_idx, 6, 0x80, field_lines);
                    return Ok(Some(new_idx));
                }
            }
            // Literal Field Line With Name Reference, static (01NTxxxx, N=0, T=1).
            varint::encode(idx, 4, 0x50, field_lines);
            write_string_literal(value, field_lines);
            return Ok(None);
        }

        if let Some(idx) = self.dynamic.find_name(name) {
            if may_block_more {
                self.dynamic.add_ref(idx)?;
                // Literal Field Line With Name Reference, dynamic (01NTxxxx, N=0, T=0).
                varint::encode(idx, 4, 0x40, field_lines);
                write_string_literal(value, field_lines);
                return Ok(Some(idx));
            }
        }

        let _ = stream_id;
        // Literal Field Line With Literal Name (001N0000, N=0); name and
        // value each carry their own Huffman flag + length prefix.
        field_lines.put_u8(0x20);
        write_string_literal(name, field_lines);
        write_string_literal(value, field_lines);
        Ok(None)
    }

    /// Applies a Section Acknowledgment from the decoder stream: releases
    /// the oldest not-yet-acknowledged block's refs and advances
    /// `known_received_count` to cover it.
    pub fn on_section_acknowledgment(&mut self, stream_id: u64) {
        if let Some(refs) = self.outstanding.get_mut(&stream_id) {
            if !refs.blocks.is_empty() {
                let block = refs.blocks.remove(0);
                for idx in block {
                    self.dynamic.release_ref(idx);
                    self.known_received_count = self.known_received_count.max(idx + 1);
                }
            }
        }
    }

    pub fn on_insert_count_increment(&mut self, increment: u64) {
        self.known_received_count += increment;
    }

    /// Applies a Stream Cancellation: releases every ref the stream held
    /// without crediting `known_received_count`.
    pub fn on_stream_cancellation(&mut self, stream_id: u64) {
        if let Some(refs) = self.outstanding.remove(&stream_id) {
            for block in refs.blocks {
                for idx in block {
                    self.dynamic.release_ref(idx);
                }
            }
        }
    }

    pub fn blocked_streams(&self) -> HashSet<u64> {
        self.outstanding
            .iter()
            .filter(|(_, refs)| {
                refs.blocks
                    .iter()
                    .flatten()
                    .any(|&idx| idx >= self.known_received_count)
            })
            .map(|(&id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;

    #[test]
    fn exact_static_match_needs_no_dynamic_insertion() {
        let mut enc = Encoder::new(4096, 16);
        let (encoder_stream, block) = enc
            .encode_header_block(0, &[(":method".into(), "GET".into())])
            .unwrap();
        assert!(encoder_stream.is_empty());
        assert!(!block.is_empty());
    }

    #[test]
    fn name_only_static_match_inserts_into_dynamic_table() {
        let mut enc = Encoder::new(4096, 16);
        let (encoder_stream, _block) = enc
            .encode_header_block(0, &[(":authority".into(), "example.com".into())])
            .unwrap();
        assert!(!encoder_stream.is_empty());
        assert_eq!(enc.dynamic_table().insert_count(), 1);
    }

    #[test]
    fn repeated_header_reuses_the_dynamic_entry_without_reinserting() {
        let mut enc = Encoder::new(4096, 16);
        enc.encode_header_block(0, &[(":authority".into(), "example.com".into())])
            .unwrap();
        let before = enc.dynamic_table().insert_count();
        assert_eq!(before, 1);
        let (encoder_stream, _block) = enc
            .encode_header_block(1, &[(":authority".into(), "example.com".into())])
            .unwrap();
        assert!(encoder_stream.is_empty());
        assert_eq!(enc.dynamic_table().insert_count(), before);
    }

    #[test]
    fn section_acknowledgment_releases_outstanding_refs() {
        let mut enc = Encoder::new(4096, 16);
        enc.encode_header_block(0, &[(":authority".into(), "example.com".into())])
            .unwrap();
        assert_eq!(enc.blocked_streams().len(), 1);
        enc.on_section_acknowledgment(0);
        assert!(enc.blocked_streams().is_empty());
    }

    #[test]
    fn header_block_round_trips_through_a_decoder() {
        let mut enc = Encoder::new(4096, 16);
        let mut dec = Decoder::new(4096);
        let (encoder_stream, block) = enc
            .encode_header_block(0, &[(":method".into(), "GET".into()), ("x-a".into(), "b".into())])
            .unwrap();
        dec.apply_encoder_instructions(&encoder_stream).unwrap();
        let decoded = dec.decode_header_block(0, &block).unwrap().expect("not blocked");
        assert_eq!(
            decoded,
            vec![(":method".to_string(), "GET".to_string()), ("x-a".to_string(), "b".to_string())]
        );
    }
}
