//! APDU wire constants and command / answer framing.

use crate::error::{Result, SigningError};
use ledger_apdu::{APDUAnswer, APDUCommand};
use num_enum::TryFromPrimitive;

pub use ledger_apdu::APDUErrorCode;

/// Largest payload carried by a single APDU.
pub const MAX_APDU_LEN: usize = 255;

pub const CLA: u8 = 0xE0;

pub const PUBLIC_KEY_LENGTH: usize = 65;
pub const BASE58_ADDRESS_SIZE: usize = 34;
pub const GET_ADDRESS_RESP_LEN: usize = 101;
pub const GET_VERSION_RESP_LEN: usize = 4;
pub const CHAINCODE_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 65;

/// Instruction codes.
pub mod ins {
    pub const GET_PUBLIC_KEY: u8 = 0x02;
    pub const SIGN: u8 = 0x04;
    /// Unsafe
    pub const SIGN_TXN_HASH: u8 = 0x05;
    /// Version and settings
    pub const GET_APP_CONFIGURATION: u8 = 0x06;
    pub const SIGN_PERSONAL_MESSAGE: u8 = 0x08;
    pub const GET_ECDH_SECRET: u8 = 0x0A;
    pub const EXTERNAL_PLUGIN_SETUP: u8 = 0x12;
    pub const CLEAR_SIGN: u8 = 0xC4;
}

/// P1 values.
pub mod p1 {
    // GET_PUBLIC_KEY
    pub const CONFIRM: u8 = 0x01;
    pub const NON_CONFIRM: u8 = 0x00;
    // SIGN / CLEAR_SIGN
    pub const SIGN: u8 = 0x10;
    pub const FIRST: u8 = 0x00;
    pub const MORE: u8 = 0x80;
    pub const LAST: u8 = 0x90;
    pub const TRC10_NAME: u8 = 0xA0;
}

/// P2 values for GET_PUBLIC_KEY.
pub mod p2 {
    pub const NO_CHAINCODE: u8 = 0x00;
    pub const CHAINCODE: u8 = 0x01;
}

/// Offsets into a raw APDU command.
pub mod offset {
    pub const CLA: usize = 0;
    pub const INS: usize = 1;
    pub const P1: usize = 2;
    pub const P2: usize = 3;
    pub const LC: usize = 4;
    pub const CDATA: usize = 5;
}

/// Status words specific to the Tron and Ethereum applications. Generic
/// ISO 7816 codes are covered by [`APDUErrorCode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum StatusWord {
    /// No plugin with the requested name is installed.
    ReferencedDataNotFound = 0x6A88,
    IncorrectBip32Path = 0x6A8A,
    MissingSettingDataAllowed = 0x6A8B,
    MissingSettingSignByHash = 0x6A8C,
    MissingSettingCustomContract = 0x6A8D,
}

impl StatusWord {
    pub fn description(self) -> &'static str {
        match self {
            Self::ReferencedDataNotFound => "referenced data not found",
            Self::IncorrectBip32Path => "incorrect bip32 path",
            Self::MissingSettingDataAllowed => "data setting not allowed",
            Self::MissingSettingSignByHash => "sign by hash setting not allowed",
            Self::MissingSettingCustomContract => "custom contract setting not allowed",
        }
    }
}

/// Human readable name of a status word, application codes first.
pub fn status_description(status: u16) -> String {
    match StatusWord::try_from(status) {
        Ok(sw) => sw.description().to_string(),
        Err(_) => match APDUErrorCode::try_from(status) {
            Ok(code) => code.description(),
            Err(_) => "unknown status".to_string(),
        },
    }
}

/// A single command APDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    pub fn new(ins: u8, p1: u8, p2: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            cla: CLA,
            ins,
            p1,
            p2,
            data: data.into(),
        }
    }

    /// Serialize as `CLA INS P1 P2 Lc DATA`.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_APDU_LEN {
            return Err(SigningError::PayloadTooLarge {
                len: self.data.len(),
                max: MAX_APDU_LEN,
            });
        }

        let command = APDUCommand {
            cla: self.cla,
            ins: self.ins,
            p1: self.p1,
            p2: self.p2,
            data: self.data.as_slice(),
        };
        Ok(command.serialize())
    }

    /// Parse a raw command. The data field runs to the end of the buffer,
    /// `Lc` is not trusted.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < offset::CDATA {
            return Err(SigningError::UnexpectedResponse(format!(
                "APDU too short: {} bytes",
                raw.len()
            )));
        }

        Ok(Self {
            cla: raw[offset::CLA],
            ins: raw[offset::INS],
            p1: raw[offset::P1],
            p2: raw[offset::P2],
            data: raw[offset::CDATA..].to_vec(),
        })
    }
}

/// Response APDU: data followed by a big-endian status word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduAnswer {
    data: Vec<u8>,
    status: u16,
}

impl ApduAnswer {
    pub fn new(data: impl Into<Vec<u8>>, status: u16) -> Self {
        Self {
            data: data.into(),
            status,
        }
    }

    pub fn from_status(status: u16) -> Self {
        Self::new(Vec::new(), status)
    }

    /// Split a raw response into data and status word.
    pub fn from_answer(raw: Vec<u8>) -> Result<Self> {
        let len = raw.len();
        let answer = APDUAnswer::from_answer(raw).map_err(|e| {
            SigningError::UnexpectedResponse(format!("{:?}: {} bytes", e, len))
        })?;

        Ok(Self::new(answer.data(), answer.retcode()))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Generic status code, or the raw value for application specific ones.
    pub fn error_code(&self) -> core::result::Result<APDUErrorCode, u16> {
        APDUErrorCode::try_from(self.status).map_err(|_| self.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == APDUErrorCode::NoError as u16
    }

    /// Convert a non-success status into a device error tagged with `ins`.
    pub fn into_result(self, ins: u8) -> Result<Self> {
        match self.is_success() {
            true => Ok(self),
            false => Err(SigningError::Device {
                status: self.status,
                ins,
            }),
        }
    }
}
