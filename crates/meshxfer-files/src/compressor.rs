//! LZ4 block (de)compression.
//!
//! `lz4_flex`'s frame format has no tunable compression level; the
//! spec's "level 1" detail maps to the crate's one speed-optimized
//! mode (see DESIGN.md).

use crate::error::FilesError;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{Read, Write};

pub fn compress(block: &[u8]) -> Vec<u8> {
    let mut encoder = FrameEncoder::new(Vec::with_capacity(block.len() / 2));
    encoder
        .write_all(block)
        .expect("writing to an in-memory buffer cannot fail");
    encoder
        .finish()
        .expect("finishing an in-memory frame cannot fail")
}

pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, FilesError> {
    let mut decoder = FrameDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| FilesError::Decompress(e.to_string()))?;
    Ok(out)
}
