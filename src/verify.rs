use crate::account::parse_public_key;
use crate::apdu::SIGNATURE_LENGTH;
use crate::error::{Result, SigningError};
use bitcoin_hashes::{sha256, Hash};
use secp256k1::{
    ecdsa::{self, RecoverableSignature, RecoveryId},
    Message, Secp256k1, SecretKey,
};

/// Transaction id: SHA-256 over the raw transaction bytes.
pub fn transaction_id(transaction: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(transaction).to_byte_array()
}

/// Verifies a 65 byte `r || s || v` signature over a 32 byte digest.
///
/// # Arguments
///
/// * `tx_id` - The signed digest.
/// * `signature` - The signature as returned by the device.
/// * `public_key` - Raw (64), uncompressed (65) or compressed (33) public key.
///
/// # Returns
///
/// `Ok(false)` when the signature does not match, an error when either
/// encoding is malformed.
pub fn check_hash_signature(tx_id: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(SigningError::InvalidSignatureLength(signature.len()));
    }

    let v = signature[64];
    if v > 1 {
        return Err(SigningError::InvalidRecoveryId(v));
    }

    let msg = Message::from_digest_slice(tx_id)?;
    let mut sig = ecdsa::Signature::from_compact(&signature[..64])?;
    sig.normalize_s();
    let pubkey = parse_public_key(public_key)?;

    Ok(Secp256k1::verification_only()
        .verify_ecdsa(&msg, &sig, &pubkey)
        .is_ok())
}

/// Hashes `transaction` and verifies `signature` against it.
pub fn check_tx_signature(transaction: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    let tx_id = transaction_id(transaction);
    check_hash_signature(&tx_id, signature, public_key)
}

/// Signs a transaction the way the device does, `r || s || v`.
pub fn sign_transaction(transaction: &[u8], secret_key: &SecretKey) -> Result<[u8; SIGNATURE_LENGTH]> {
    let msg = Message::from_digest_slice(&transaction_id(transaction))?;
    let sig = Secp256k1::signing_only().sign_ecdsa_recoverable(&msg, secret_key);
    Ok(encode_recoverable(&sig))
}

fn encode_recoverable(sig: &RecoverableSignature) -> [u8; SIGNATURE_LENGTH] {
    let (recover_id, serialized_sig) = sig.serialize_compact();

    let mut joint_sig = [0u8; SIGNATURE_LENGTH];
    joint_sig[..64].copy_from_slice(&serialized_sig);
    joint_sig[64] = recover_id.to_i32() as u8;
    joint_sig
}

/// Recovers the signer public key (uncompressed) from a device signature.
pub fn recover_public_key(tx_id: &[u8], signature: &[u8]) -> Result<[u8; 65]> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(SigningError::InvalidSignatureLength(signature.len()));
    }

    let recover_id = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|_| SigningError::InvalidRecoveryId(signature[64]))?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recover_id)?;
    let msg = Message::from_digest_slice(tx_id)?;

    let public_key = Secp256k1::verification_only().recover_ecdsa(&msg, &sig)?;
    Ok(public_key.serialize_uncompressed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_sign_and_verify() {
        let account = Account::derive(MNEMONIC, 0).unwrap();
        let tx = b"not really a protobuf";

        let signature = sign_transaction(tx, &account.secret_key).unwrap();
        assert!(check_tx_signature(tx, &signature, &account.public_key_raw()).unwrap());

        let public_key = account.public_key.serialize_uncompressed();
        assert_eq!(
            public_key,
            recover_public_key(&transaction_id(tx), &signature).unwrap()
        );
    }

    #[test]
    fn test_verify_wrong_key_or_data() {
        let signer = Account::derive(MNEMONIC, 0).unwrap();
        let other = Account::derive(MNEMONIC, 1).unwrap();
        let tx = b"payload";

        let signature = sign_transaction(tx, &signer.secret_key).unwrap();
        assert!(!check_tx_signature(tx, &signature, &other.public_key_raw()).unwrap());
        assert!(!check_tx_signature(b"other", &signature, &signer.public_key_raw()).unwrap());
    }

    #[test]
    fn test_malformed_inputs() {
        let signer = Account::derive(MNEMONIC, 0).unwrap();
        let signature = sign_transaction(b"tx", &signer.secret_key).unwrap();

        assert!(matches!(
            check_tx_signature(b"tx", &signature[..64], &signer.public_key_raw()),
            Err(SigningError::InvalidSignatureLength(64))
        ));

        let mut bad_v = signature;
        bad_v[64] = 27;
        assert!(matches!(
            check_tx_signature(b"tx", &bad_v, &signer.public_key_raw()),
            Err(SigningError::InvalidRecoveryId(27))
        ));

        assert!(check_tx_signature(b"tx", &signature, &[0x04; 12]).is_err());
    }
}
