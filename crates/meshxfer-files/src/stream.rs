//! Sender-side stream buffering: files in, fixed-size blocks out.
//!
//! `StreamWriter` owns one contiguous byte buffer and a per-file
//! running SHA-256 hash keyed by relative path. Callers `feed` file
//! bytes in metadata order; `drain_blocks` detaches completed 1 MiB
//! blocks (optionally LZ4-compressed) as they accumulate, and `flush`
//! emits the final, possibly undersized, residue block.

use crate::compressor;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

/// Target size of a forward data block before compression.
pub const BLOCK_SIZE: usize = 1024 * 1024;

pub struct StreamWriter {
    buffer: Vec<u8>,
    hashers: IndexMap<String, Sha256>,
    compress: bool,
}

impl StreamWriter {
    #[must_use]
    pub fn new(compress: bool) -> Self {
        Self {
            buffer: Vec::with_capacity(BLOCK_SIZE),
            hashers: IndexMap::new(),
            compress,
        }
    }

    /// Append bytes belonging to `relative_path`, updating that
    /// file's running hash.
    pub fn feed(&mut self, relative_path: &str, data: &[u8]) {
        self.hashers
            .entry(relative_path.to_string())
            .or_insert_with(Sha256::new)
            .update(data);
        self.buffer.extend_from_slice(data);
    }

    /// Detach every full block currently buffered, framed as wire
    /// bytes (optionally compressed).
    pub fn drain_blocks(&mut self) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        while self.buffer.len() >= BLOCK_SIZE {
            let rest = self.buffer.split_off(BLOCK_SIZE);
            let block = std::mem::replace(&mut self.buffer, rest);
            blocks.push(self.frame_block(block));
        }
        blocks
    }

    /// Detach whatever remains as a final, possibly-undersized block.
    /// Returns `None` if nothing is buffered.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.buffer);
        Some(self.frame_block(block))
    }

    fn frame_block(&self, block: Vec<u8>) -> Vec<u8> {
        if self.compress {
            compressor::compress(&block)
        } else {
            block
        }
    }

    /// Finalize and return the per-file hex-encoded SHA-256 map, in
    /// the order files were first fed. Only call once all files have
    /// been fed.
    #[must_use]
    pub fn finish_hashes(self) -> std::collections::HashMap<String, String> {
        self.hashers
            .into_iter()
            .map(|(path, hasher)| (path, hex::encode(hasher.finalize())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_small_file_flushes_as_one_block() {
        let mut writer = StreamWriter::new(false);
        writer.feed("hello.txt", b"hi\n");
        assert!(writer.drain_blocks().is_empty());
        let residue = writer.flush().unwrap();
        assert_eq!(residue, b"hi\n");

        let hashes = writer.finish_hashes();
        let mut hasher = Sha256::new();
        hasher.update(b"hi\n");
        assert_eq!(hashes["hello.txt"], hex::encode(hasher.finalize()));
    }

    #[test]
    fn block_boundary_splits_across_files() {
        let mut writer = StreamWriter::new(false);
        writer.feed("a", &vec![0u8; BLOCK_SIZE - 1]);
        writer.feed("b", &[1u8]);

        let blocks = writer.drain_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), BLOCK_SIZE);
        assert_eq!(blocks[0][BLOCK_SIZE - 1], 1u8);

        assert!(writer.flush().is_none());
    }

    #[test]
    fn compressed_blocks_decompress_back_to_original() {
        let mut writer = StreamWriter::new(true);
        let data = vec![0x5Au8; BLOCK_SIZE * 2 + 37];
        writer.feed("big.bin", &data);

        let mut reconstructed = Vec::new();
        for block in writer.drain_blocks() {
            reconstructed.extend(crate::compressor::decompress(&block).unwrap());
        }
        if let Some(residue) = writer.flush() {
            reconstructed.extend(crate::compressor::decompress(&residue).unwrap());
        }
        assert_eq!(reconstructed, data);
    }
}
