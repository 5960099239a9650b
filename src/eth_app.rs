//! Ethereum application commands used by the harness.

use crate::apdu::{ins, ApduAnswer, ApduCommand, MAX_APDU_LEN};
use crate::error::{Result, SigningError};
use crate::transport::Exchange;
use log::{debug, info};

pub struct EthAppClient<T: Exchange> {
    transport: T,
}

impl<T: Exchange> EthAppClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Register `name` as the plugin handling calls to `selector` on the
    /// contract at `address`.
    ///
    /// The signature authenticating the registration is optional, test
    /// builds of the application accept unsigned registrations.
    pub fn set_external_plugin(
        &mut self,
        name: &str,
        address: &[u8],
        selector: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<ApduAnswer> {
        let command = ApduCommand::new(
            ins::EXTERNAL_PLUGIN_SETUP,
            0x00,
            0x00,
            external_plugin_payload(name, address, selector, signature)?,
        );
        info!(
            "Registering plugin '{}' for {} selector {}",
            name,
            hex::encode(address),
            hex::encode(selector)
        );

        let answer = self.transport.exchange(&command)?;
        debug!("<= {:#06x}", answer.status());
        answer.into_result(command.ins)
    }
}

/// `len(name) || name || address || selector || signature`
pub fn external_plugin_payload(
    name: &str,
    address: &[u8],
    selector: &[u8],
    signature: Option<&[u8]>,
) -> Result<Vec<u8>> {
    if name.is_empty() {
        return Err(SigningError::MissingAppName);
    }
    let name_len = u8::try_from(name.len()).map_err(|_| SigningError::PayloadTooLarge {
        len: name.len(),
        max: u8::MAX as usize,
    })?;

    let mut data = vec![name_len];
    data.extend_from_slice(name.as_bytes());
    data.extend_from_slice(address);
    data.extend_from_slice(selector);
    data.extend_from_slice(signature.unwrap_or_default());

    if data.len() > MAX_APDU_LEN {
        return Err(SigningError::PayloadTooLarge {
            len: data.len(),
            max: MAX_APDU_LEN,
        });
    }
    Ok(data)
}
