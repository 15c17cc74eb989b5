//! Binary model format.
//!
//! Little-endian, fixed-width layout:
//!
//! ```text
//! [magic: u32][version: u32][vocab_size: u32][merge_count: u32]
//! [a: u32, b: u32, new_id: u32] x merge_count
//! [len: u32, bytes: u8 x len]  x vocab_size
//! ```
//!
//! The reader validates structure before trusting any length field:
//! magic and version match, counts stay within plausibility bounds,
//! vocabulary and merge counts agree, and every merge rule names its
//! parents below its sequentially assigned child ID.

use std::io::Write;

use crate::error::BpeError;
use crate::types::MergeRule;

pub(crate) const MODEL_MAGIC: u32 = 0x4250_4521;
pub(crate) const MODEL_VERSION: u32 = 1;

const MAX_VOCAB: u32 = 1_000_000;
const MAX_MERGES: u32 = 1_000_000;
const MAX_TOKEN_LEN: u32 = 1000;

const BASE_VOCAB: u32 = 256;

/// Writes the model in the binary layout above.
pub(crate) fn write_model<W: Write>(
    out: &mut W,
    vocab: &[Vec<u8>],
    merges: &[MergeRule],
) -> Result<(), BpeError> {
    out.write_all(&MODEL_MAGIC.to_le_bytes())?;
    out.write_all(&MODEL_VERSION.to_le_bytes())?;
    out.write_all(&(vocab.len() as u32).to_le_bytes())?;
    out.write_all(&(merges.len() as u32).to_le_bytes())?;

    for rule in merges {
        out.write_all(&rule.a.to_le_bytes())?;
        out.write_all(&rule.b.to_le_bytes())?;
        out.write_all(&rule.new_id.to_le_bytes())?;
    }

    for token in vocab {
        out.write_all(&(token.len() as u32).to_le_bytes())?;
        out.write_all(token)?;
    }

    Ok(())
}

/// Parses a model from an in-memory byte buffer.
pub(crate) fn read_model(data: &[u8]) -> Result<(Vec<Vec<u8>>, Vec<MergeRule>), BpeError> {
    let mut reader = Reader::new(data);

    let magic = reader.read_u32()?;
    if magic != MODEL_MAGIC {
        return Err(BpeError::BadMagic(magic));
    }
    let version = reader.read_u32()?;
    if version != MODEL_VERSION {
        return Err(BpeError::UnsupportedVersion(version));
    }

    let vocab_size = reader.read_u32()?;
    let merge_count = reader.read_u32()?;
    if vocab_size > MAX_VOCAB || merge_count > MAX_MERGES {
        return Err(BpeError::CorruptModel(format!(
            "implausible vocab size {vocab_size} or merge count {merge_count}"
        )));
    }
    if vocab_size != BASE_VOCAB + merge_count {
        return Err(BpeError::CorruptModel(format!(
            "vocab size {vocab_size} does not match merge count {merge_count}"
        )));
    }

    let mut merges = Vec::with_capacity(merge_count as usize);
    for rank in 0..merge_count {
        let a = reader.read_u32()?;
        let b = reader.read_u32()?;
        let new_id = reader.read_u32()?;
        if new_id != BASE_VOCAB + rank || a >= new_id || b >= new_id {
            return Err(BpeError::CorruptModel(format!(
                "malformed merge rule ({a}, {b}) -> {new_id} at rank {rank}"
            )));
        }
        merges.push(MergeRule { a, b, new_id });
    }

    let mut vocab = Vec::with_capacity(vocab_size as usize);
    for id in 0..vocab_size {
        let len = reader.read_u32()?;
        if len > MAX_TOKEN_LEN {
            return Err(BpeError::CorruptModel(format!(
                "token {id} has implausible length {len}"
            )));
        }
        vocab.push(reader.read_bytes(len as usize)?.to_vec());
    }

    Ok((vocab, merges))
}

/// Little-endian reader over a byte buffer, with bounds checks.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u32(&mut self) -> Result<u32, BpeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BpeError> {
        if self.remaining() < len {
            return Err(truncated());
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

fn truncated() -> BpeError {
    BpeError::CorruptModel("unexpected end of file".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> (Vec<Vec<u8>>, Vec<MergeRule>) {
        let mut vocab: Vec<Vec<u8>> = (0u16..256).map(|b| vec![b as u8]).collect();
        vocab.push(b"aa".to_vec());
        vocab.push(b"aab".to_vec());
        let merges = vec![
            MergeRule { a: 97, b: 97, new_id: 256 },
            MergeRule { a: 256, b: 98, new_id: 257 },
        ];
        (vocab, merges)
    }

    fn to_bytes(vocab: &[Vec<u8>], merges: &[MergeRule]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_model(&mut buf, vocab, merges).expect("writing to memory cannot fail");
        buf
    }

    #[test]
    fn round_trips_byte_for_byte() {
        let (vocab, merges) = sample_model();
        let buf = to_bytes(&vocab, &merges);
        let (read_vocab, read_merges) = read_model(&buf).expect("model must load");
        assert_eq!(read_vocab, vocab);
        assert_eq!(read_merges, merges);
    }

    #[test]
    fn empty_model_round_trips() {
        let vocab: Vec<Vec<u8>> = (0u16..256).map(|b| vec![b as u8]).collect();
        let buf = to_bytes(&vocab, &[]);
        let (read_vocab, read_merges) = read_model(&buf).expect("model must load");
        assert_eq!(read_vocab.len(), 256);
        assert!(read_merges.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let (vocab, merges) = sample_model();
        let mut buf = to_bytes(&vocab, &merges);
        buf[0] ^= 0xFF;
        assert!(matches!(read_model(&buf), Err(BpeError::BadMagic(_))));
    }

    #[test]
    fn rejects_unknown_version() {
        let (vocab, merges) = sample_model();
        let mut buf = to_bytes(&vocab, &merges);
        buf[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            read_model(&buf),
            Err(BpeError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let (vocab, merges) = sample_model();
        let buf = to_bytes(&vocab, &merges);
        for cut in [0, 7, 16, buf.len() - 1] {
            assert!(
                matches!(read_model(&buf[..cut]), Err(BpeError::CorruptModel(_))),
                "truncation at {cut} must fail"
            );
        }
    }

    #[test]
    fn rejects_vocab_merge_count_mismatch() {
        let (vocab, merges) = sample_model();
        let mut buf = to_bytes(&vocab, &merges);
        // Claim one extra vocab entry.
        buf[8..12].copy_from_slice(&259u32.to_le_bytes());
        assert!(matches!(read_model(&buf), Err(BpeError::CorruptModel(_))));
    }

    #[test]
    fn rejects_implausible_counts() {
        let (vocab, merges) = sample_model();
        let mut buf = to_bytes(&vocab, &merges);
        buf[8..12].copy_from_slice(&2_000_000u32.to_le_bytes());
        assert!(matches!(read_model(&buf), Err(BpeError::CorruptModel(_))));
    }

    #[test]
    fn rejects_non_sequential_merge_ids() {
        let (vocab, mut merges) = sample_model();
        merges[1].new_id = 300;
        let buf = to_bytes(&vocab, &merges);
        assert!(matches!(read_model(&buf), Err(BpeError::CorruptModel(_))));
    }

    #[test]
    fn rejects_parent_at_or_above_child() {
        let (vocab, mut merges) = sample_model();
        merges[0].a = 256;
        let buf = to_bytes(&vocab, &merges);
        assert!(matches!(read_model(&buf), Err(BpeError::CorruptModel(_))));
    }

    #[test]
    fn rejects_oversized_token_length() {
        let (vocab, merges) = sample_model();
        let mut buf = to_bytes(&vocab, &merges);
        // First vocab entry starts right after the merge rules.
        let vocab_offset = 16 + merges.len() * 12;
        buf[vocab_offset..vocab_offset + 4].copy_from_slice(&5000u32.to_le_bytes());
        assert!(matches!(read_model(&buf), Err(BpeError::CorruptModel(_))));
    }
}
