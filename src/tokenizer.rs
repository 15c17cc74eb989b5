//! The tokenizer facade: owns the learned model and wires training,
//! encoding, decoding and model I/O together.

use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use rayon::prelude::*;

use crate::encoder::{encode_segment, RankMap};
use crate::error::{BpeError, ErrorMode};
use crate::pretokenize;
use crate::serialize;
use crate::trainer::Trainer;
use crate::types::{MergeRule, TokenId};

const BASE_VOCAB: usize = 256;
const MAX_TARGET_VOCAB: u32 = 1_000_000;

/// A byte-level BPE tokenizer.
///
/// Fresh instances know only the 256 byte tokens. [`train`] appends
/// learned merges and vocabulary entries; [`load`] restores a
/// previously saved model. Encoding and decoding are read-only, so a
/// trained or loaded tokenizer can be shared freely across threads.
///
/// [`train`]: BpeTokenizer::train
/// [`load`]: BpeTokenizer::load
#[derive(Debug)]
pub struct BpeTokenizer {
    /// Byte string per token ID; `vocab[id]` for a merged token is the
    /// concatenation of its parents' entries.
    vocab: Vec<Vec<u8>>,
    /// Learned merges in the order they were produced.
    merges: Vec<MergeRule>,
    /// Pair-to-rank lookup, rebuilt after every train or load.
    ranks: RankMap,
}

impl Default for BpeTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl BpeTokenizer {
    /// Creates a tokenizer holding only the base byte vocabulary.
    pub fn new() -> Self {
        let vocab = (0..BASE_VOCAB).map(|b| vec![b as u8]).collect();
        Self {
            vocab,
            merges: Vec::new(),
            ranks: RankMap::build(&[]),
        }
    }

    /// Learns merges from `corpus` until the vocabulary reaches
    /// `target_vocab`, merge candidates run out, or none clears
    /// `min_freq`.
    ///
    /// # Errors
    ///
    /// [`BpeError::InvalidVocabSize`] when the target is below the
    /// byte vocabulary or beyond the model format's limit, and
    /// [`BpeError::InvalidMinFreq`] for a zero frequency floor.
    pub fn train(
        &mut self,
        corpus: &[u8],
        target_vocab: u32,
        min_freq: u32,
    ) -> Result<(), BpeError> {
        if target_vocab < BASE_VOCAB as u32 || target_vocab > MAX_TARGET_VOCAB {
            return Err(BpeError::InvalidVocabSize(target_vocab));
        }
        if min_freq == 0 {
            return Err(BpeError::InvalidMinFreq);
        }

        Trainer::new(corpus, target_vocab, min_freq).run(&mut self.merges, &mut self.vocab);
        self.ranks = RankMap::build(&self.merges);
        Ok(())
    }

    /// Encodes text into token IDs.
    pub fn encode(&self, text: &str) -> Vec<TokenId> {
        self.encode_bytes(text.as_bytes())
    }

    /// Encodes a raw byte string into token IDs.
    ///
    /// The input is split into segments exactly as during training and
    /// merges are applied per segment, so no output token straddles a
    /// segment boundary.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Vec<TokenId> {
        let (ids, next) = pretokenize::split(bytes);

        let mut out = Vec::with_capacity(ids.len());
        let mut segment: Vec<TokenId> = Vec::with_capacity(32);
        for (i, &id) in ids.iter().enumerate() {
            segment.push(id);
            if next[i] == -1 {
                encode_segment(&mut segment, &self.ranks, &self.merges);
                out.extend_from_slice(&segment);
                segment.clear();
            }
        }
        out
    }

    /// Encodes many texts in parallel, preserving input order.
    pub fn encode_batch(&self, texts: &[&str]) -> Vec<Vec<TokenId>> {
        texts.par_iter().map(|text| self.encode(text)).collect()
    }

    /// Decodes token IDs back into the byte string they cover.
    ///
    /// # Errors
    ///
    /// [`BpeError::UnknownToken`] when an ID has no vocabulary entry.
    pub fn decode(&self, ids: &[TokenId]) -> Result<Vec<u8>, BpeError> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            let bytes = self
                .vocab
                .get(id as usize)
                .ok_or(BpeError::UnknownToken(id))?;
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }

    /// Decodes many token sequences in parallel, preserving order.
    pub fn decode_batch(&self, sequences: &[&[TokenId]]) -> Result<Vec<Vec<u8>>, BpeError> {
        sequences.par_iter().map(|ids| self.decode(ids)).collect()
    }

    /// Decodes token IDs into text, handling invalid UTF-8 per `mode`.
    pub fn decode_text(&self, ids: &[TokenId], mode: ErrorMode) -> Result<String, BpeError> {
        let bytes = self.decode(ids)?;
        match mode {
            ErrorMode::Strict => Ok(String::from_utf8(bytes)?),
            ErrorMode::Replace => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Writes the model to `path` in the binary format.
    pub fn save(&self, path: &Path) -> Result<(), BpeError> {
        let mut out = BufWriter::new(File::create(path)?);
        serialize::write_model(&mut out, &self.vocab, &self.merges)
    }

    /// Loads a model saved by [`save`](BpeTokenizer::save) and
    /// rebuilds the rank lookup.
    pub fn load(path: &Path) -> Result<Self, BpeError> {
        let data = fs::read(path)?;
        let (vocab, merges) = serialize::read_model(&data)?;
        let ranks = RankMap::build(&merges);
        Ok(Self {
            vocab,
            merges,
            ranks,
        })
    }

    /// Number of tokens in the vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Number of learned merge rules.
    pub fn merge_count(&self) -> usize {
        self.merges.len()
    }

    /// The learned merges in rank order.
    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    /// Byte string behind a token ID, if it exists.
    pub fn token_bytes(&self, id: TokenId) -> Option<&[u8]> {
        self.vocab.get(id as usize).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained(corpus: &[u8], target_vocab: u32, min_freq: u32) -> BpeTokenizer {
        let mut tokenizer = BpeTokenizer::new();
        tokenizer
            .train(corpus, target_vocab, min_freq)
            .expect("training failed");
        tokenizer
    }

    #[test]
    fn fresh_tokenizer_is_byte_identity() {
        let tokenizer = BpeTokenizer::new();
        assert_eq!(tokenizer.vocab_size(), 256);
        assert_eq!(tokenizer.encode("abc"), vec![97, 98, 99]);
    }

    #[test]
    fn trains_and_encodes_reference_corpus() {
        let tokenizer = trained(b"aaabdaaabac", 259, 2);
        assert_eq!(tokenizer.vocab_size(), 259);
        assert_eq!(tokenizer.merge_count(), 3);
        assert_eq!(
            tokenizer.encode("aaabdaaabac"),
            vec![258, 100, 258, 97, 99]
        );
    }

    #[test]
    fn encode_matches_training_output_on_corpus() {
        let corpus = b"low lower lowest low low lower";
        let tokenizer = trained(corpus, 280, 2);
        let ids = tokenizer.encode_bytes(corpus);
        let decoded = tokenizer.decode(&ids).expect("decoding failed");
        assert_eq!(decoded, corpus.to_vec());
        // Merges must have fired for the repeated "low" prefix.
        assert!(ids.len() < corpus.len());
    }

    #[test]
    fn no_token_crosses_a_segment_boundary() {
        let tokenizer = trained(b"hello world hello world", 280, 2);
        let ids = tokenizer.encode("hello world");
        // Rebuild the byte stream token by token; the space must come
        // back as its own single-byte token.
        let pieces: Vec<&[u8]> = ids
            .iter()
            .map(|&id| tokenizer.token_bytes(id).expect("token must exist"))
            .collect();
        assert!(pieces.contains(&b" ".as_slice()));
        for piece in pieces {
            let has_space = piece.contains(&b' ');
            assert!(!has_space || piece == b" ", "token mixes space and letters");
        }
    }

    #[test]
    fn unique_pairs_yield_zero_merges() {
        let corpus: Vec<u8> = (0u16..256).map(|b| b as u8).collect();
        let tokenizer = trained(&corpus, 1000, 2);
        assert_eq!(tokenizer.merge_count(), 0);
        assert_eq!(tokenizer.vocab_size(), 256);
    }

    #[test]
    fn vocab_size_accounts_for_merges() {
        let tokenizer = trained(b"ababab ababab cdcdcd", 300, 2);
        assert_eq!(
            tokenizer.vocab_size(),
            256 + tokenizer.merge_count()
        );
        assert!(tokenizer.vocab_size() <= 300);
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let corpus = b"mixed 123 content, with punctuation! \xFF\xFE and raw bytes";
        let tokenizer = trained(corpus, 300, 2);
        for sample in [
            corpus.to_vec(),
            b"held-out text 42".to_vec(),
            vec![0u8, 255, 128, 7],
            Vec::new(),
        ] {
            let ids = tokenizer.encode_bytes(&sample);
            assert_eq!(
                tokenizer.decode(&ids).expect("decoding failed"),
                sample
            );
        }
    }

    #[test]
    fn empty_text_encodes_to_nothing() {
        let tokenizer = trained(b"some corpus text", 270, 2);
        assert!(tokenizer.encode("").is_empty());
        assert_eq!(tokenizer.decode(&[]).expect("decoding failed"), Vec::<u8>::new());
    }

    #[test]
    fn decode_rejects_unknown_ids() {
        let tokenizer = BpeTokenizer::new();
        assert!(matches!(
            tokenizer.decode(&[97, 4242]),
            Err(BpeError::UnknownToken(4242))
        ));
    }

    #[test]
    fn decode_text_modes_differ_on_invalid_utf8() {
        let tokenizer = BpeTokenizer::new();
        let ids = [0xFFu32, 97];
        assert!(tokenizer.decode_text(&ids, ErrorMode::Strict).is_err());
        let lossy = tokenizer
            .decode_text(&ids, ErrorMode::Replace)
            .expect("lossy decoding cannot fail on known ids");
        assert_eq!(lossy, "\u{FFFD}a");
    }

    #[test]
    fn rejects_invalid_training_arguments() {
        let mut tokenizer = BpeTokenizer::new();
        assert!(matches!(
            tokenizer.train(b"abc", 255, 2),
            Err(BpeError::InvalidVocabSize(255))
        ));
        assert!(matches!(
            tokenizer.train(b"abc", 2_000_000, 2),
            Err(BpeError::InvalidVocabSize(_))
        ));
        assert!(matches!(
            tokenizer.train(b"abc", 300, 0),
            Err(BpeError::InvalidMinFreq)
        ));
    }

    #[test]
    fn batch_encode_and_decode_preserve_order() {
        let tokenizer = trained(b"abab abab abab", 258, 2);
        let texts = ["abab", "ba", "abab"];
        let encoded = tokenizer.encode_batch(&texts);
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[0], encoded[2]);

        let slices: Vec<&[TokenId]> = encoded.iter().map(Vec::as_slice).collect();
        let decoded = tokenizer.decode_batch(&slices).expect("decoding failed");
        for (text, bytes) in texts.iter().zip(&decoded) {
            assert_eq!(bytes, &text.as_bytes().to_vec());
        }
    }

    #[test]
    fn save_and_reload_preserve_model_and_encodings() {
        let dir = tempfile::tempdir().expect("tempdir creation failed");
        let path = dir.path().join("model.bpe");

        let tokenizer = trained(b"the quick brown fox the quick brown fox", 290, 2);
        tokenizer.save(&path).expect("saving failed");

        let reloaded = BpeTokenizer::load(&path).expect("loading failed");
        assert_eq!(reloaded.vocab_size(), tokenizer.vocab_size());
        assert_eq!(reloaded.merges(), tokenizer.merges());

        let held_out = "the slow brown dog";
        assert_eq!(reloaded.encode(held_out), tokenizer.encode(held_out));
    }

    #[test]
    fn load_rejects_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir creation failed");
        let result = BpeTokenizer::load(&dir.path().join("absent.bpe"));
        assert!(matches!(result, Err(BpeError::Io(_))));
    }
}
