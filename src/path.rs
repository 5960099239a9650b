use crate::error::{Result, SigningError};
use bip32::DerivationPath;
use core::str::FromStr;

/// Deepest path accepted by the device.
pub const MAX_PATH_DEPTH: usize = 10;

/// Pack a derivation path as a component count followed by each child
/// index as a big-endian `u32` (hardened bit included).
///
/// ```
/// use tron_clear_signing::path::pack_derivation_path;
///
/// let packed = pack_derivation_path("m/44'/195'/0'/0/0").unwrap();
/// assert_eq!(21, packed.len());
/// assert_eq!(&[0x05u8, 0x80, 0x00, 0x00, 0x2c], &packed[..5]);
/// ```
pub fn pack_derivation_path(path: &str) -> Result<Vec<u8>> {
    let parsed = DerivationPath::from_str(path)
        .map_err(|e| SigningError::InvalidDerivationPath(format!("{path}: {e}")))?;

    let children: Vec<u32> = parsed.iter().map(|child| child.0).collect();
    if children.len() > MAX_PATH_DEPTH {
        return Err(SigningError::InvalidDerivationPath(format!(
            "{path}: depth {} exceeds {MAX_PATH_DEPTH}",
            children.len()
        )));
    }

    let mut packed = Vec::with_capacity(1 + 4 * children.len());
    packed.push(children.len() as u8);
    for child in children {
        packed.extend_from_slice(&child.to_be_bytes());
    }

    Ok(packed)
}

/// Inverse of [`pack_derivation_path`], returns the child indices and the
/// number of bytes consumed.
pub fn unpack_derivation_path(packed: &[u8]) -> Result<(Vec<u32>, usize)> {
    let depth = *packed
        .first()
        .ok_or_else(|| SigningError::InvalidDerivationPath("empty buffer".to_string()))?
        as usize;
    let consumed = 1 + 4 * depth;

    if depth > MAX_PATH_DEPTH || packed.len() < consumed {
        return Err(SigningError::InvalidDerivationPath(format!(
            "bad packed path of depth {depth} in {} bytes",
            packed.len()
        )));
    }

    let children = packed[1..consumed]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok((children, consumed))
}

/// Format child indices back into `m/...` notation.
pub fn format_derivation_path(children: &[u32]) -> String {
    let mut path = String::from("m");
    for child in children {
        match child & 0x8000_0000 {
            0 => path.push_str(&format!("/{child}")),
            _ => path.push_str(&format!("/{}'", child & 0x7FFF_FFFF)),
        }
    }
    path
}
