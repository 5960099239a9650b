use crate::apdu::status_description;

#[derive(thiserror::Error, Debug)]
pub enum SigningError {
    #[error("Error in {ins:#04x} command: status {status:#06x} ({})", status_name(.status))]
    Device { status: u16, ins: u8 },

    #[error("Payload too large: {len} (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("Application name is not set")]
    MissingAppName,

    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(#[from] bip39::Error),

    #[error("Key derivation error: {0}")]
    Derivation(#[from] bip32::Error),

    #[error("Invalid signature error: {0}")]
    InvalidSignature(#[from] secp256k1::Error),

    #[error("Invalid signature length: {0}")]
    InvalidSignatureLength(usize),

    #[error("Invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("Unexpected APDU response: {0}")]
    UnexpectedResponse(String),

    #[error("An exchange is already in progress")]
    ExchangeInProgress,

    #[error("No exchange in progress")]
    NoPendingExchange,

    #[error("Transport lost track of an unanswered exchange, reconnect")]
    TransportOutOfSync,

    #[error("Text '{text}' not found on screen after {steps} steps")]
    TextNotFound { text: String, steps: usize },

    #[error("Unknown device model: {0}")]
    UnknownModel(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_name(status: &u16) -> String {
    status_description(*status)
}

pub type Result<T, E = SigningError> = core::result::Result<T, E>;
