//! In-memory device double.
//!
//! Emulates the Ethereum application hosting an external Tron plugin
//! closely enough to run the clear-signing scenarios without an emulator:
//! chunks are reassembled from their P1 tags, contracts must be registered
//! through `EXTERNAL_PLUGIN_SETUP`, the review is shown on screens driven by
//! [`MockNavigator`] and the transaction is signed with the key derived
//! from the device mnemonic.

use crate::account::{b58encode_check, extended_private_key, private_key, raw_address};
use crate::apdu::{ins, p1, p2, APDUErrorCode, ApduAnswer, ApduCommand, StatusWord, CLA, MAX_APDU_LEN};
use crate::error::{Result, SigningError};
use crate::model::Model;
use crate::navigator::{NavIns, Navigator};
use crate::path::{format_derivation_path, unpack_derivation_path};
use crate::transport::{Exchange, PendingExchange};
use crate::verify::sign_transaction;
use log::{debug, info};
use secp256k1::{PublicKey, Secp256k1};
use std::cell::RefCell;
use std::rc::Rc;

const SELECTOR_SIZE: usize = 4;
const HOME_SCREEN: [&str; 2] = ["Ethereum", "is ready"];

/// A registered external plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginRegistration {
    pub name: String,
    pub address: Vec<u8>,
    pub selector: [u8; SELECTOR_SIZE],
    pub signature: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct SignContext {
    ins: u8,
    buffer: Vec<u8>,
    token_names: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct ReviewState {
    ins: u8,
    path: String,
    transaction: Vec<u8>,
    screens: Vec<Vec<String>>,
    index: usize,
    confirmed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Screen {
    Home,
    Review,
    Status,
}

#[derive(Debug)]
struct DeviceState {
    mnemonic: String,
    model: Model,
    version: (u8, u8, u8),
    installed_plugins: Vec<String>,
    plugins: Vec<PluginRegistration>,
    auto_approve: bool,
    log: Vec<ApduCommand>,
    sign: Option<SignContext>,
    review: Option<ReviewState>,
    ready: Option<ApduAnswer>,
    screen: Screen,
}

/// Transport half of the device double. Clones share the same device.
#[derive(Clone, Debug)]
pub struct MockDevice {
    state: Rc<RefCell<DeviceState>>,
}

/// Navigation half of the device double.
#[derive(Clone, Debug)]
pub struct MockNavigator {
    state: Rc<RefCell<DeviceState>>,
}

impl MockDevice {
    pub fn new(mnemonic: impl Into<String>, model: Model) -> Self {
        let state = DeviceState {
            mnemonic: mnemonic.into(),
            model,
            version: (0, 5, 0),
            installed_plugins: vec![],
            plugins: vec![],
            auto_approve: false,
            log: vec![],
            sign: None,
            review: None,
            ready: None,
            screen: Screen::Home,
        };

        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Install a plugin that may later be registered for a contract.
    pub fn with_plugin(self, name: impl Into<String>) -> Self {
        self.state.borrow_mut().installed_plugins.push(name.into());
        self
    }

    pub fn with_version(self, major: u8, minor: u8, patch: u8) -> Self {
        self.state.borrow_mut().version = (major, minor, patch);
        self
    }

    /// Approve reviews without navigation.
    pub fn with_auto_approve(self, auto_approve: bool) -> Self {
        self.state.borrow_mut().auto_approve = auto_approve;
        self
    }

    pub fn navigator(&self) -> MockNavigator {
        MockNavigator {
            state: self.state.clone(),
        }
    }

    pub fn model(&self) -> Model {
        self.state.borrow().model
    }

    /// Every command received so far.
    pub fn exchanges(&self) -> Vec<ApduCommand> {
        self.state.borrow().log.clone()
    }

    pub fn clear_exchanges(&self) {
        self.state.borrow_mut().log.clear();
    }

    pub fn registered_plugins(&self) -> Vec<PluginRegistration> {
        self.state.borrow().plugins.clone()
    }
}

impl Exchange for MockDevice {
    fn begin_exchange(&mut self, command: &ApduCommand) -> Result<PendingExchange> {
        let mut state = self.state.borrow_mut();
        if state.ready.is_some() || state.review.is_some() {
            return Err(SigningError::ExchangeInProgress);
        }

        state.log.push(command.clone());
        debug!(
            "mock <= ins {:#04x} p1 {:#04x} p2 {:#04x} ({} bytes)",
            command.ins,
            command.p1,
            command.p2,
            command.data.len()
        );

        let answer = state.process(command);
        state.ready = answer;
        Ok(PendingExchange::new(command.clone()))
    }

    fn complete_exchange(&mut self, pending: PendingExchange) -> Result<ApduAnswer> {
        let mut state = self.state.borrow_mut();

        if let Some(answer) = state.ready.take() {
            return Ok(answer);
        }

        let review = state.review.take().ok_or(SigningError::NoPendingExchange)?;
        if state.screen == Screen::Review {
            state.screen = Screen::Home;
        }

        if !(review.confirmed || state.auto_approve) {
            info!("mock: review of ins {:#04x} not approved", pending.ins());
            return Ok(ApduAnswer::from_status(APDUErrorCode::ConditionsNotSatisfied as u16));
        }

        Ok(state.sign_reviewed(&review))
    }

    fn abandon_exchange(&mut self, pending: PendingExchange) {
        let mut state = self.state.borrow_mut();
        info!("mock: ins {:#04x} abandoned", pending.ins());

        state.ready = None;
        state.review = None;
        state.screen = Screen::Home;
    }
}

impl DeviceState {
    /// Handle a command, `None` when the answer waits on a review.
    fn process(&mut self, command: &ApduCommand) -> Option<ApduAnswer> {
        if command.cla != CLA {
            return Some(ApduAnswer::from_status(APDUErrorCode::ClaNotSupported as u16));
        }
        if command.data.len() > MAX_APDU_LEN {
            return Some(ApduAnswer::from_status(APDUErrorCode::WrongLength as u16));
        }

        let answer = match command.ins {
            ins::GET_APP_CONFIGURATION => {
                let (major, minor, patch) = self.version;
                Ok(ApduAnswer::new(vec![0x00, major, minor, patch], APDUErrorCode::NoError as u16))
            }
            ins::GET_PUBLIC_KEY => self.get_public_key(command),
            ins::EXTERNAL_PLUGIN_SETUP => self.register_plugin(&command.data),
            ins::SIGN | ins::CLEAR_SIGN => return self.sign_chunk(command),
            _ => Err(APDUErrorCode::InsNotSupported as u16),
        };

        Some(answer.unwrap_or_else(ApduAnswer::from_status))
    }

    fn get_public_key(&self, command: &ApduCommand) -> core::result::Result<ApduAnswer, u16> {
        let (children, consumed) =
            unpack_derivation_path(&command.data).map_err(|_| StatusWord::IncorrectBip32Path as u16)?;
        if consumed != command.data.len() {
            return Err(APDUErrorCode::WrongLength as u16);
        }

        let path = format_derivation_path(&children);
        let secret_key =
            private_key(&self.mnemonic, &path).map_err(|_| StatusWord::IncorrectBip32Path as u16)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret_key);

        let address = b58encode_check(raw_address(&public_key));
        let public_key = public_key.serialize_uncompressed();

        let mut data = vec![public_key.len() as u8];
        data.extend_from_slice(&public_key);
        data.push(address.len() as u8);
        data.extend_from_slice(address.as_bytes());
        if command.p2 == p2::CHAINCODE {
            let xprv = extended_private_key(&self.mnemonic, &path)
                .map_err(|_| StatusWord::IncorrectBip32Path as u16)?;
            data.extend_from_slice(&xprv.attrs().chain_code);
        }

        Ok(ApduAnswer::new(data, APDUErrorCode::NoError as u16))
    }

    fn register_plugin(&mut self, data: &[u8]) -> core::result::Result<ApduAnswer, u16> {
        let name_len = *data.first().ok_or(APDUErrorCode::WrongLength as u16)? as usize;
        let name = data
            .get(1..1 + name_len)
            .ok_or(APDUErrorCode::WrongLength as u16)?;
        let name = String::from_utf8(name.to_vec()).map_err(|_| APDUErrorCode::BadKeyHandle as u16)?;
        let rest = &data[1 + name_len..];

        if !self.installed_plugins.contains(&name) {
            info!("mock: plugin '{}' is not installed", name);
            return Err(StatusWord::ReferencedDataNotFound as u16);
        }

        let (address, selector, signature) = split_registration(rest).ok_or(APDUErrorCode::BadKeyHandle as u16)?;

        info!(
            "mock: registered plugin '{}' for {} selector {}",
            name,
            hex::encode(address),
            hex::encode(selector)
        );

        let mut sel = [0u8; SELECTOR_SIZE];
        sel.copy_from_slice(selector);
        self.plugins.push(PluginRegistration {
            name,
            address: address.to_vec(),
            selector: sel,
            signature: signature.map(<[u8]>::to_vec),
        });

        Ok(ApduAnswer::from_status(APDUErrorCode::NoError as u16))
    }

    fn sign_chunk(&mut self, command: &ApduCommand) -> Option<ApduAnswer> {
        let data = command.data.clone();
        let tag = command.p1;

        let last = match tag {
            p1::SIGN => {
                self.sign = Some(SignContext {
                    ins: command.ins,
                    buffer: data,
                    ..Default::default()
                });
                true
            }
            p1::FIRST => {
                self.sign = Some(SignContext {
                    ins: command.ins,
                    buffer: data,
                    ..Default::default()
                });
                false
            }
            p1::MORE | p1::LAST => match self.sign.as_mut() {
                Some(ctx) if ctx.ins == command.ins && ctx.token_names.is_empty() => {
                    ctx.buffer.extend_from_slice(&data);
                    tag == p1::LAST
                }
                _ => return self.reject(APDUErrorCode::BadKeyHandle as u16),
            },
            _ if tag & 0xF0 == p1::TRC10_NAME => {
                // middle blocks carry their index, the last one the block count minus one
                let index = (tag & 0x07) as usize;
                let accepted = match self.sign.as_mut() {
                    Some(ctx) if ctx.ins == command.ins && ctx.token_names.len() == index => {
                        ctx.token_names.push(data);
                        true
                    }
                    _ => false,
                };
                if !accepted {
                    return self.reject(APDUErrorCode::BadKeyHandle as u16);
                }
                tag & ins::SIGN_PERSONAL_MESSAGE != 0
            }
            _ => return self.reject(APDUErrorCode::InvalidP1P2 as u16),
        };

        if !last {
            return Some(ApduAnswer::from_status(APDUErrorCode::NoError as u16));
        }

        let Some(ctx) = self.sign.take() else {
            return self.reject(APDUErrorCode::BadKeyHandle as u16);
        };
        let (children, consumed) = match unpack_derivation_path(&ctx.buffer) {
            Ok(v) => v,
            Err(_) => return Some(ApduAnswer::from_status(StatusWord::IncorrectBip32Path as u16)),
        };
        let transaction = ctx.buffer[consumed..].to_vec();

        let Some(plugin) = self.plugin_for(&transaction) else {
            info!("mock: no plugin registered for transaction");
            return Some(ApduAnswer::from_status(APDUErrorCode::BadKeyHandle as u16));
        };

        let screens = review_screens(self.model, &plugin);
        self.review = Some(ReviewState {
            ins: ctx.ins,
            path: format_derivation_path(&children),
            transaction,
            screens,
            index: 0,
            confirmed: false,
        });
        self.screen = Screen::Review;

        None
    }

    fn reject(&mut self, status: u16) -> Option<ApduAnswer> {
        self.sign = None;
        Some(ApduAnswer::from_status(status))
    }

    /// Plugin whose contract address and selector both appear in `transaction`.
    fn plugin_for(&self, transaction: &[u8]) -> Option<PluginRegistration> {
        self.plugins
            .iter()
            .rev()
            .find(|p| contains(transaction, &p.address) && contains(transaction, &p.selector))
            .cloned()
    }

    fn sign_reviewed(&self, review: &ReviewState) -> ApduAnswer {
        let signed = private_key(&self.mnemonic, &review.path)
            .and_then(|key| sign_transaction(&review.transaction, &key));

        match signed {
            Ok(signature) => {
                info!(
                    "mock: signed with {} (ins {:#04x})",
                    review.path, review.ins
                );
                ApduAnswer::new(signature.to_vec(), APDUErrorCode::NoError as u16)
            }
            Err(_) => ApduAnswer::from_status(APDUErrorCode::Unknown as u16),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Split `address || selector || signature?`. Addresses are 20 bytes, or 21
/// with the Tron prefix; a signature must be a complete DER sequence.
fn split_registration(rest: &[u8]) -> Option<(&[u8], &[u8], Option<&[u8]>)> {
    for address_len in [21, 20] {
        if rest.len() == address_len + SELECTOR_SIZE {
            let (address, selector) = rest.split_at(address_len);
            return Some((address, selector, None));
        }
    }

    for address_len in [21, 20] {
        let Some(signature) = rest.get(address_len + SELECTOR_SIZE..) else {
            continue;
        };
        if signature.len() > 2 && signature[0] == 0x30 && signature[1] as usize + 2 == signature.len() {
            let (address, tail) = rest.split_at(address_len);
            return Some((address, &tail[..SELECTOR_SIZE], Some(signature)));
        }
    }

    None
}

fn method_label(selector: &[u8; SELECTOR_SIZE]) -> String {
    match selector {
        [0xa9, 0x05, 0x9c, 0xbb] => "Transfer".to_string(),
        [0x7f, 0xf3, 0x6a, 0xb5] => "Swap".to_string(),
        _ => format!("0x{}", hex::encode(selector)),
    }
}

fn review_screens(model: Model, plugin: &PluginRegistration) -> Vec<Vec<String>> {
    let label = method_label(&plugin.selector);
    let screens: Vec<Vec<&str>> = match model.is_nano() {
        true => vec![
            vec!["Review", "transaction"],
            vec![&plugin.name, &label],
            vec!["Sign", "transaction"],
        ],
        false => vec![
            vec!["Review transaction", &plugin.name],
            vec![&label],
            vec!["Hold to sign"],
        ],
    };

    screens
        .into_iter()
        .map(|s| s.into_iter().map(str::to_string).collect())
        .collect()
}

impl Navigator for MockNavigator {
    fn perform(&mut self, ins: NavIns) -> Result<()> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let nano = state.model.is_nano();
        debug!("mock UI: {:?}", ins);

        match state.screen {
            Screen::Review => {
                let Some(review) = state.review.as_mut() else {
                    return Ok(());
                };
                let last = review.screens.len() - 1;

                let confirm = match (ins, nano) {
                    (NavIns::RightClick, true) | (NavIns::Touch { .. }, false) => {
                        review.index = (review.index + 1).min(last);
                        false
                    }
                    (NavIns::LeftClick, true) => {
                        review.index = review.index.saturating_sub(1);
                        false
                    }
                    (NavIns::BothClick, true) | (NavIns::ReviewConfirm, _) => review.index == last,
                    _ => false,
                };

                if confirm {
                    review.confirmed = true;
                    state.screen = match nano {
                        true => Screen::Home,
                        false => Screen::Status,
                    };
                }
            }
            Screen::Status if ins == NavIns::StatusDismiss => state.screen = Screen::Home,
            _ => {}
        }

        Ok(())
    }

    fn screen_text(&mut self) -> Result<Vec<String>> {
        let state = self.state.borrow();
        let screen = match (state.screen, state.review.as_ref()) {
            (Screen::Review, Some(review)) => review.screens[review.index].clone(),
            (Screen::Status, _) => vec!["Transaction signed".to_string()],
            _ => HOME_SCREEN.iter().map(|s| s.to_string()).collect(),
        };
        Ok(screen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_registration() {
        let address = [0x41; 21];
        let selector = [0xa9, 0x05, 0x9c, 0xbb];

        let mut plain = address.to_vec();
        plain.extend_from_slice(&selector);
        let (a, s, sig) = split_registration(&plain).unwrap();
        assert_eq!(&address[..], a);
        assert_eq!(&selector[..], s);
        assert!(sig.is_none());

        let mut signed = address[1..].to_vec();
        signed.extend_from_slice(&selector);
        signed.extend_from_slice(&[0x30, 0x02, 0x01, 0x02]);
        let (a, s, sig) = split_registration(&signed).unwrap();
        assert_eq!(20, a.len());
        assert_eq!(&selector[..], s);
        assert_eq!(Some(&[0x30, 0x02, 0x01, 0x02][..]), sig);

        assert!(split_registration(&[0u8; 7]).is_none());
    }

    #[test]
    fn test_home_screen_without_review() {
        let device = MockDevice::new("abandon", Model::NanoSP);
        let mut nav = device.navigator();
        assert_eq!(vec!["Ethereum", "is ready"], nav.screen_text().unwrap());
        nav.perform(NavIns::BothClick).unwrap();
        assert_eq!(vec!["Ethereum", "is ready"], nav.screen_text().unwrap());
    }

    #[test]
    fn test_unknown_instruction() {
        let mut device = MockDevice::new("abandon", Model::NanoSP);
        let answer = device
            .exchange(&ApduCommand::new(0x42, 0x00, 0x00, vec![]))
            .unwrap();
        assert_eq!(APDUErrorCode::InsNotSupported as u16, answer.status());
    }

    #[test]
    fn test_public_key_matches_account() {
        let mnemonic = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let account = crate::account::Account::derive(mnemonic, 1).unwrap();
        let path = crate::path::pack_derivation_path(&account.path).unwrap();

        let mut device = MockDevice::new(mnemonic, Model::NanoX);
        let answer = device
            .exchange(&ApduCommand::new(ins::GET_PUBLIC_KEY, p1::NON_CONFIRM, p2::CHAINCODE, path))
            .unwrap();
        assert!(answer.is_success());

        let data = answer.data();
        assert_eq!(&account.public_key.serialize_uncompressed()[..], &data[1..66]);
        assert_eq!(account.address.as_bytes(), &data[67..101]);

        let xprv = extended_private_key(mnemonic, &account.path).unwrap();
        assert_eq!(&xprv.attrs().chain_code[..], &data[101..]);
    }
}
