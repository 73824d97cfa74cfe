use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub fn sha256_file(path: &Path) -> Result<String> {
    let f = File::open(path)?;
    let mut reader = BufReader::new(f);
    let mut sha = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 { break; }
        sha.update(&buf[..n]);
    }
    Ok(hex::encode(sha.finalize()))
}

/// First field of `sha256sum` output, lowercased.
pub fn parse_sha256sum(output: &str) -> Result<String> {
    let digest = output.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("unexpected sha256sum output: {:?}", output.trim());
    }
    Ok(digest)
}
