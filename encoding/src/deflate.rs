//! Raw deflate wrapping for the deflated transfer syntax.
//!
//! The deflate stream covers the main data set only;
//! the file meta group always stays in plain explicit little endian.
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use std::io::Read;

/// Inflate a raw RFC-1951 deflate stream into the coded data set bytes.
pub fn inflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Deflate the coded data set bytes into a raw RFC-1951 stream.
pub fn deflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(bytes, Compression::default());
    let mut out = Vec::with_capacity(bytes.len() / 2 + 64);
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflate_reverses_deflate() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let packed = deflate(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(inflate(&packed).unwrap(), data);
    }

    #[test]
    fn inflate_rejects_garbage() {
        assert!(inflate(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }
}
