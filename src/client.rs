use crate::account::{compute_address_from_public_key, Account};
use crate::apdu::{
    ins, p1, p2, ApduAnswer, ApduCommand, BASE58_ADDRESS_SIZE, CHAINCODE_LENGTH,
    GET_ADDRESS_RESP_LEN, GET_VERSION_RESP_LEN, MAX_APDU_LEN, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
use crate::error::{Result, SigningError};
use crate::model::Model;
use crate::navigator::{Navigator, Review};
use crate::path::pack_derivation_path;
use crate::transport::Exchange;
use log::{debug, info, warn};

/// Number of accounts derived when the client is created.
pub const ACCOUNT_COUNT: u32 = 2;

/// Position of the first auxiliary signature block among the messages.
const TOKEN_POS: usize = 1;

/// Signature blocks are indexed in the low three bits of P1.
pub const MAX_SIGNATURE_BLOCKS: usize = 8;

/// Application version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Parsed `GET_PUBLIC_KEY` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyResponse {
    pub public_key: Vec<u8>,
    pub address: String,
    pub chain_code: Option<Vec<u8>>,
}

/// One APDU of a chunked signing request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub p1: u8,
    pub data: Vec<u8>,
}

/// Split a signing request into tagged messages.
///
/// The first message carries the packed path and the transaction and must
/// stay under [`MAX_APDU_LEN`]; each auxiliary signature block follows as
/// its own message.
pub fn signing_chunks<S: AsRef<[u8]>>(path: &str, tx: &[u8], signatures: &[S]) -> Result<Vec<Chunk>> {
    let mut data = pack_derivation_path(path)?;
    data.extend_from_slice(tx);
    if data.len() >= MAX_APDU_LEN {
        return Err(SigningError::PayloadTooLarge {
            len: data.len(),
            max: MAX_APDU_LEN,
        });
    }

    if signatures.len() > MAX_SIGNATURE_BLOCKS {
        return Err(SigningError::PayloadTooLarge {
            len: signatures.len(),
            max: MAX_SIGNATURE_BLOCKS,
        });
    }

    let mut messages = vec![data];
    messages.extend(signatures.iter().map(|s| s.as_ref().to_vec()));

    let count = messages.len();
    let chunks = messages
        .into_iter()
        .enumerate()
        .map(|(i, data)| {
            let p1 = match i + 1 == count {
                true => last_p1(count, signatures.len()),
                false => intermediate_p1(i),
            };
            Chunk { p1, data }
        })
        .collect();

    Ok(chunks)
}

fn intermediate_p1(i: usize) -> u8 {
    match i {
        0 => p1::FIRST,
        _ if i < TOKEN_POS => p1::MORE,
        _ => p1::TRC10_NAME | p1::FIRST | (i - TOKEN_POS) as u8,
    }
}

fn last_p1(count: usize, signatures: usize) -> u8 {
    match (count, signatures) {
        (1, _) => p1::SIGN,
        // existing protocol behaviour, the instruction code lands in P1
        (_, n) if n > 0 => p1::TRC10_NAME | ins::SIGN_PERSONAL_MESSAGE | (n - 1) as u8,
        _ => p1::LAST,
    }
}

/// Test client for the Tron side of the plugin.
///
/// Owns the transport, the navigator and the accounts derived from the
/// device mnemonic.
pub struct TronClient<T: Exchange, N: Navigator> {
    transport: T,
    navigator: N,
    model: Model,
    accounts: Vec<Account>,
}

impl<T: Exchange, N: Navigator> TronClient<T, N> {
    pub fn new(transport: T, navigator: N, model: Model, mnemonic: &str) -> Result<Self> {
        let accounts = (0..ACCOUNT_COUNT)
            .map(|i| Account::derive(mnemonic, i))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Derived accounts: {:?}",
            accounts.iter().map(|a| &a.address).collect::<Vec<_>>()
        );

        Ok(Self {
            transport,
            navigator,
            model,
            accounts,
        })
    }

    pub fn account(&self, index: usize) -> Option<&Account> {
        self.accounts.get(index)
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn navigator(&mut self) -> &mut N {
        &mut self.navigator
    }

    fn send(&mut self, command: ApduCommand) -> Result<ApduAnswer> {
        debug!(
            "=> ins {:#04x} p1 {:#04x} p2 {:#04x} ({} bytes)",
            command.ins,
            command.p1,
            command.p2,
            command.data.len()
        );

        let answer = self.transport.exchange(&command)?;
        debug!("<= {:#06x} ({} bytes)", answer.status(), answer.data().len());

        answer.into_result(command.ins)
    }

    /// Fetch the application version.
    pub fn get_version(&mut self) -> Result<Version> {
        let answer = self.send(ApduCommand::new(ins::GET_APP_CONFIGURATION, 0x00, 0x00, vec![]))?;
        unpack_version(answer.data())
    }

    /// Fetch the public key and address at `path` without user confirmation.
    pub fn get_public_key(&mut self, path: &str, request_chaincode: bool) -> Result<PublicKeyResponse> {
        let p2 = match request_chaincode {
            true => p2::CHAINCODE,
            false => p2::NO_CHAINCODE,
        };
        let payload = pack_derivation_path(path)?;

        let answer = self.send(ApduCommand::new(ins::GET_PUBLIC_KEY, p1::NON_CONFIRM, p2, payload))?;
        let response = unpack_public_key(answer.data(), request_chaincode)?;

        let expected = compute_address_from_public_key(&response.public_key)?;
        if expected != response.address {
            return Err(SigningError::UnexpectedResponse(format!(
                "address {} does not match public key ({})",
                response.address, expected
            )));
        }

        Ok(response)
    }

    /// Send a raw, already serialized APDU.
    pub fn send_apdu(&mut self, apdu: &[u8]) -> Result<ApduAnswer> {
        let command = ApduCommand::parse(apdu)?;
        self.send(command)
    }

    /// Drive the device through a review until `review.text` shows, then
    /// approve.
    pub fn navigate(&mut self, review: &Review) -> Result<()> {
        let (step, validation) = self.model.review_flow();
        info!("Navigating to '{}' on {}", review.text, self.model);

        self.navigator
            .navigate_until_text(step, &validation, &review.text, review.snapshot.as_deref())
    }

    /// Clear-sign `tx` with the key at `path`.
    ///
    /// With a `review` the last exchange is left open while the review is
    /// navigated; without one it completes synchronously.
    pub fn clear_sign<S: AsRef<[u8]>>(
        &mut self,
        path: &str,
        tx: &[u8],
        signatures: &[S],
        review: Option<&Review>,
    ) -> Result<ApduAnswer> {
        self.sign_with(ins::CLEAR_SIGN, path, tx, signatures, review)
    }

    /// Blind-sign `tx` with the plain `SIGN` instruction.
    pub fn sign<S: AsRef<[u8]>>(
        &mut self,
        path: &str,
        tx: &[u8],
        signatures: &[S],
        review: Option<&Review>,
    ) -> Result<ApduAnswer> {
        self.sign_with(ins::SIGN, path, tx, signatures, review)
    }

    fn sign_with<S: AsRef<[u8]>>(
        &mut self,
        ins: u8,
        path: &str,
        tx: &[u8],
        signatures: &[S],
        review: Option<&Review>,
    ) -> Result<ApduAnswer> {
        let mut chunks = signing_chunks(path, tx, signatures)?;
        let Some(last) = chunks.pop() else {
            return Err(SigningError::UnexpectedResponse("no message to send".to_string()));
        };

        for chunk in chunks {
            self.send(ApduCommand::new(ins, chunk.p1, 0x00, chunk.data))?;
        }

        let command = ApduCommand::new(ins, last.p1, 0x00, last.data);
        let Some(review) = review else {
            return self.send(command);
        };

        let pending = self.transport.begin_exchange(&command)?;
        if let Err(e) = self.navigate(review) {
            warn!("Abandoning ins {:#04x} exchange: {}", pending.ins(), e);
            self.transport.abandon_exchange(pending);
            return Err(e);
        }

        let answer = self.transport.complete_exchange(pending)?;
        debug!("<= {:#06x} ({} bytes)", answer.status(), answer.data().len());
        answer.into_result(ins)
    }
}

/// Signature carried by a successful signing response.
pub fn response_signature(answer: &ApduAnswer) -> Result<&[u8]> {
    answer.data().get(..SIGNATURE_LENGTH).ok_or_else(|| {
        SigningError::UnexpectedResponse(format!(
            "signature response of {} bytes",
            answer.data().len()
        ))
    })
}

pub fn unpack_version(data: &[u8]) -> Result<Version> {
    match data {
        [_flags, major, minor, patch] => Ok(Version {
            major: *major,
            minor: *minor,
            patch: *patch,
        }),
        _ => Err(SigningError::UnexpectedResponse(format!(
            "version response of {} bytes, expected {}",
            data.len(),
            GET_VERSION_RESP_LEN
        ))),
    }
}

pub fn unpack_public_key(data: &[u8], chaincode: bool) -> Result<PublicKeyResponse> {
    let expected = match chaincode {
        true => GET_ADDRESS_RESP_LEN + CHAINCODE_LENGTH,
        false => GET_ADDRESS_RESP_LEN,
    };
    if data.len() != expected
        || data[0] as usize != PUBLIC_KEY_LENGTH
        || data[1 + PUBLIC_KEY_LENGTH] as usize != BASE58_ADDRESS_SIZE
    {
        return Err(SigningError::UnexpectedResponse(format!(
            "public key response of {} bytes, expected {}",
            data.len(),
            expected
        )));
    }

    let public_key = data[1..1 + PUBLIC_KEY_LENGTH].to_vec();
    let address = &data[2 + PUBLIC_KEY_LENGTH..GET_ADDRESS_RESP_LEN];
    let address = String::from_utf8(address.to_vec())
        .map_err(|_| SigningError::InvalidAddressFormat(hex::encode(address)))?;
    let chain_code = chaincode.then(|| data[GET_ADDRESS_RESP_LEN..].to_vec());

    Ok(PublicKeyResponse {
        public_key,
        address,
        chain_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "m/44'/195'/0'/0/0";

    #[test]
    fn test_single_chunk() {
        let chunks = signing_chunks::<&[u8]>(PATH, &[0xAB; 16], &[]).unwrap();
        assert_eq!(1, chunks.len());
        assert_eq!(p1::SIGN, chunks[0].p1);
        assert_eq!(21 + 16, chunks[0].data.len());
    }

    #[test]
    fn test_chunks_with_signatures() {
        let signatures = [vec![0x01u8; 8], vec![0x02u8; 8], vec![0x03u8; 8]];
        let chunks = signing_chunks(PATH, &[0xAB; 16], &signatures).unwrap();

        let tags: Vec<u8> = chunks.iter().map(|c| c.p1).collect();
        assert_eq!(vec![0x00, 0xA0, 0xA1, 0xAA], tags);
        assert_eq!(signatures[2], chunks[3].data);
    }

    #[test]
    fn test_single_signature_block() {
        let chunks = signing_chunks(PATH, &[0xAB; 16], &[[0x01u8; 4]]).unwrap();
        let tags: Vec<u8> = chunks.iter().map(|c| c.p1).collect();
        assert_eq!(vec![p1::FIRST, 0xA8], tags);
    }

    #[test]
    fn test_payload_limit() {
        // 21 byte path + 233 bytes = 254, the largest accepted payload
        assert!(signing_chunks::<&[u8]>(PATH, &[0u8; 233], &[]).is_ok());
        assert!(matches!(
            signing_chunks::<&[u8]>(PATH, &[0u8; 234], &[]),
            Err(SigningError::PayloadTooLarge { len: 255, .. })
        ));
    }

    #[test]
    fn test_signature_block_limit() {
        let signatures = vec![[0x01u8; 4]; MAX_SIGNATURE_BLOCKS];
        let chunks = signing_chunks(PATH, &[0xAB; 16], &signatures).unwrap();
        let tags: Vec<u8> = chunks.iter().map(|c| c.p1).collect();
        assert_eq!(vec![0x00, 0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xAF], tags);

        let signatures = vec![[0x01u8; 4]; MAX_SIGNATURE_BLOCKS + 1];
        assert!(matches!(
            signing_chunks(PATH, &[0xAB; 16], &signatures),
            Err(SigningError::PayloadTooLarge { len: 9, max: 8 })
        ));

        let signatures = vec![[0x01u8; 4]; 256];
        assert!(signing_chunks(PATH, &[0xAB; 16], &signatures).is_err());
    }

    #[test]
    fn test_intermediate_and_last_tags() {
        assert_eq!(p1::FIRST, intermediate_p1(0));
        assert_eq!(0xA0, intermediate_p1(1));
        assert_eq!(0xA4, intermediate_p1(5));
        assert_eq!(p1::SIGN, last_p1(1, 0));
        assert_eq!(p1::LAST, last_p1(2, 0));
        assert_eq!(0xA9, last_p1(3, 2));
    }

    #[test]
    fn test_unpack_version() {
        let version = unpack_version(&[0x00, 0x00, 0x05, 0x01]).unwrap();
        assert_eq!(
            Version {
                major: 0,
                minor: 5,
                patch: 1
            },
            version
        );
        assert!(unpack_version(&[0x00, 0x05]).is_err());
    }
}
