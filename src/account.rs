use crate::error::{Result, SigningError};
use base58::{FromBase58, ToBase58};
use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use bitcoin_hashes::{sha256d, Hash};
use core::str::FromStr;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

/// Tron mainnet address prefix byte.
pub const ADDRESS_PREFIX: u8 = 0x41;

/// SLIP-44 coin type for Tron.
pub const TRON_COIN_TYPE: u32 = 195;

/// Key material and addresses for one derived account.
#[derive(Clone, Debug)]
pub struct Account {
    /// Derivation path, `m/44'/195'/{index}'/0/0`
    pub path: String,
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    /// `41` prefixed hex address, uppercase
    pub address_hex: String,
    /// Base58check address, `T...`
    pub address: String,
}

impl Account {
    /// Derive account `index` from a BIP-39 mnemonic.
    pub fn derive(mnemonic: &str, index: u32) -> Result<Self> {
        Self::derive_at(mnemonic, index, 0, 0)
    }

    pub fn derive_at(mnemonic: &str, account: u32, change: u32, address_index: u32) -> Result<Self> {
        let path = format!("m/44'/{TRON_COIN_TYPE}'/{account}'/{change}/{address_index}");
        let secret_key = private_key(mnemonic, &path)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret_key);

        let raw = raw_address(&public_key);

        Ok(Self {
            path,
            secret_key,
            public_key,
            address_hex: hex::encode_upper(raw),
            address: b58encode_check(raw),
        })
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Uncompressed public key, `04` prefixed, uppercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode_upper(self.public_key.serialize_uncompressed())
    }

    /// Uncompressed public key without the `04` prefix.
    pub fn public_key_raw(&self) -> [u8; 64] {
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&self.public_key.serialize_uncompressed()[1..]);
        raw
    }
}

/// BIP-39 seed with an empty passphrase.
pub fn generate_seed(mnemonic: &str) -> Result<[u8; 64]> {
    let mnemonic = Mnemonic::parse_in(Language::English, mnemonic)?;
    Ok(mnemonic.to_seed(""))
}

/// BIP-32 extended private key at `path`.
pub fn extended_private_key(mnemonic: &str, path: &str) -> Result<XPrv> {
    let seed = generate_seed(mnemonic)?;
    let path = DerivationPath::from_str(path)
        .map_err(|e| SigningError::InvalidDerivationPath(format!("{path}: {e}")))?;

    Ok(XPrv::derive_from_path(seed, &path)?)
}

/// BIP-32 secp256k1 private key at `path`.
pub fn private_key(mnemonic: &str, path: &str) -> Result<SecretKey> {
    let xprv = extended_private_key(mnemonic, path)?;
    let secret_key = SecretKey::from_slice(xprv.private_key().to_bytes().as_slice())?;
    Ok(secret_key)
}

/// `0x41 || keccak256(pubkey)[12..]`
pub fn raw_address(public_key: &PublicKey) -> [u8; 21] {
    let public_bytes = public_key.serialize_uncompressed();

    // keccak over the key without its 0x04 prefix
    let mut hasher = Keccak256::default();
    hasher.update(&public_bytes.as_slice()[1..]);
    let digest = hasher.finalize();

    let mut raw = [ADDRESS_PREFIX; 21];
    raw[1..21].copy_from_slice(&digest[digest.len() - 20..]);
    raw
}

/// Base58check address for a public key in any SEC1 encoding.
pub fn compute_address_from_public_key(public_key: &[u8]) -> Result<String> {
    let public_key = parse_public_key(public_key)?;
    Ok(b58encode_check(raw_address(&public_key)))
}

/// Accepts 33 byte compressed, 65 byte uncompressed or 64 byte raw keys.
pub fn parse_public_key(public_key: &[u8]) -> Result<PublicKey> {
    let key = match public_key.len() {
        64 => {
            let mut full = [0x04; 65];
            full[1..].copy_from_slice(public_key);
            PublicKey::from_slice(&full)?
        }
        _ => PublicKey::from_slice(public_key)?,
    };
    Ok(key)
}

/// Decode a base58check address into uppercase hex.
pub fn address_hex(address: &str) -> Result<String> {
    Ok(hex::encode_upper(b58decode_check(address)?))
}

pub fn b58encode_check<T: AsRef<[u8]>>(raw: T) -> String {
    let digest = sha256d::Hash::hash(raw.as_ref()).to_byte_array();

    let mut raw = raw.as_ref().to_owned();
    raw.extend(&digest[..4]);
    raw.to_base58()
}

pub fn b58decode_check(address: &str) -> Result<Vec<u8>> {
    let mut raw = address
        .from_base58()
        .map_err(|e| SigningError::InvalidAddressFormat(format!("{address}: {e:?}")))?;

    if raw.len() < 5 {
        return Err(SigningError::InvalidAddressFormat(format!(
            "{address}: too short"
        )));
    }

    let checksum = raw.split_off(raw.len() - 4);
    let digest = sha256d::Hash::hash(&raw).to_byte_array();
    if digest[..4] != checksum[..] {
        return Err(SigningError::InvalidAddressFormat(format!(
            "{address}: bad checksum"
        )));
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_seed() {
        let seed = generate_seed(MNEMONIC).unwrap();
        assert_eq!(
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4",
            hex::encode(seed)
        );
    }

    #[test]
    fn test_derive_accounts() {
        let first = Account::derive(MNEMONIC, 0).unwrap();
        let second = Account::derive(MNEMONIC, 1).unwrap();

        assert_eq!("m/44'/195'/0'/0/0", first.path);
        assert_eq!("m/44'/195'/1'/0/0", second.path);
        assert_ne!(first.address, second.address);

        assert!(first.address.starts_with('T'));
        assert_eq!(34, first.address.len());
        assert_eq!(42, first.address_hex.len());
        assert!(first.address_hex.starts_with("41"));
        assert_eq!(first.address_hex, address_hex(&first.address).unwrap());

        assert!(first.public_key_hex().starts_with("04"));
        assert_eq!(130, first.public_key_hex().len());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = Account::derive(MNEMONIC, 0).unwrap();
        let b = Account::derive(MNEMONIC, 0).unwrap();
        assert_eq!(a.private_key_hex(), b.private_key_hex());
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn test_address_from_public_key_encodings() {
        let account = Account::derive(MNEMONIC, 0).unwrap();

        let raw = account.public_key_raw();
        let compressed = account.public_key.serialize();
        let uncompressed = account.public_key.serialize_uncompressed();

        assert_eq!(account.address, compute_address_from_public_key(&raw).unwrap());
        assert_eq!(
            account.address,
            compute_address_from_public_key(&compressed).unwrap()
        );
        assert_eq!(
            account.address,
            compute_address_from_public_key(&uncompressed).unwrap()
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(Account::derive("not a valid mnemonic", 0).is_err());
        assert!(address_hex("TKdAp53XCQfqraaBQ9aZeGtG5DqEMqozo1").is_err());
        assert!(address_hex("0OIl").is_err());
    }
}
