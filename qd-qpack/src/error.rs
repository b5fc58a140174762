//! QPACK-specific errors (RFC 9204 §6).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QpackError {
    #[error("prefixed integer exceeds the varint cap")]
    IntegerTooLarge,
    #[error("truncated input while decoding a prefixed integer")]
    IntegerTruncated,
    #[error("truncated input while decoding a Huffman string")]
    HuffmanTruncated,
    #[error("Huffman code does not resolve to a valid symbol")]
    HuffmanInvalidCode,
    #[error("Huffman padding is not an EOS prefix")]
    HuffmanBadPadding,
    #[error("static table index {0} is out of range")]
    StaticIndexOutOfRange(u64),
    #[error("dynamic table index {0} is out of range")]
    DynamicIndexOutOfRange(u64),
    #[error("referenced dynamic table entry has already been evicted")]
    DynamicEntryEvicted,
    #[error("header field line is truncated or malformed")]
    MalformedInstruction,
    #[error("inserting this entry would exceed the dynamic table capacity")]
    EntryTooLarge,
    #[error("cannot evict an entry with outstanding references")]
    EvictionBlocked,
    #[error("decoder stream instruction refers to an unknown stream")]
    UnknownStream,
}

pub type QpackResult<T> = Result<T, QpackError>;
