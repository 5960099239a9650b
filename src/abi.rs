//! Contract ABI helper.
//!
//! Enough of the Solidity ABI to build call data for the contracts the
//! plugin decodes: selectors plus head/tail encoding of the usual
//! parameter types.

use crate::account::ADDRESS_PREFIX;
use crate::error::{Result, SigningError};
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use std::path::Path;

/// Size of a function selector.
pub const SELECTOR_LENGTH: usize = 4;

const WORD: usize = 32;

/// Solidity parameter type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
    Uint(usize),
    Int(usize),
    Address,
    Bool,
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<ParamType>),
}

impl ParamType {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(Self::Array(Box::new(Self::parse(inner)?)));
        }

        let param = match s {
            "address" => Self::Address,
            "bool" => Self::Bool,
            "bytes" => Self::Bytes,
            "string" => Self::String,
            "uint" => Self::Uint(256),
            "int" => Self::Int(256),
            _ => {
                let sized = |prefix: &str| -> Option<usize> { s.strip_prefix(prefix)?.parse().ok() };
                match (sized("uint"), sized("int"), sized("bytes")) {
                    (Some(bits), _, _) if bits % 8 == 0 && (8..=256).contains(&bits) => Self::Uint(bits),
                    (_, Some(bits), _) if bits % 8 == 0 && (8..=256).contains(&bits) => Self::Int(bits),
                    (_, _, Some(len)) if (1..=WORD).contains(&len) => Self::FixedBytes(len),
                    _ => return Err(SigningError::Abi(format!("unsupported type '{s}'"))),
                }
            }
        };
        Ok(param)
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Address => write!(f, "address"),
            Self::Bool => write!(f, "bool"),
            Self::FixedBytes(len) => write!(f, "bytes{len}"),
            Self::Bytes => write!(f, "bytes"),
            Self::String => write!(f, "string"),
            Self::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// A value to encode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Unsigned integer; negative `int` values are not supported
    Uint(u128),
    Address([u8; 20]),
    Bool(bool),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<Token>),
}

impl Token {
    /// Address token from 20 raw bytes or a 21-byte `41` prefixed Tron address.
    pub fn address(raw: &[u8]) -> Result<Self> {
        let raw = match raw {
            [ADDRESS_PREFIX, rest @ ..] if rest.len() == 20 => rest,
            _ => raw,
        };

        let address = <[u8; 20]>::try_from(raw)
            .map_err(|_| SigningError::InvalidAddressFormat(hex::encode(raw)))?;
        Ok(Self::Address(address))
    }

    /// Address token from hex, with or without `0x`.
    pub fn address_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim_start_matches("0x"))?;
        Self::address(&raw)
    }

    fn matches(&self, param: &ParamType) -> bool {
        match (self, param) {
            (Self::Uint(_), ParamType::Uint(_) | ParamType::Int(_)) => true,
            (Self::Address(_), ParamType::Address) => true,
            (Self::Bool(_), ParamType::Bool) => true,
            (Self::FixedBytes(b), ParamType::FixedBytes(len)) => b.len() == *len,
            (Self::Bytes(_), ParamType::Bytes) => true,
            (Self::String(_), ParamType::String) => true,
            (Self::Array(items), ParamType::Array(inner)) => items.iter().all(|t| t.matches(inner)),
            _ => false,
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Self::Bytes(_) | Self::String(_) | Self::Array(_))
    }
}

/// Encode `tokens` with the standard head/tail layout.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token.is_dynamic() {
            true => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend(encode_dynamic(token));
            }
            false => head.extend_from_slice(&encode_static(token)),
        }
    }

    head.extend(tail);
    head
}

fn encode_static(token: &Token) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    match token {
        Token::Uint(v) => word = uint_word(*v),
        Token::Address(a) => word[WORD - 20..].copy_from_slice(a),
        Token::Bool(b) => word[WORD - 1] = *b as u8,
        Token::FixedBytes(b) => word[..b.len().min(WORD)].copy_from_slice(&b[..b.len().min(WORD)]),
        Token::Bytes(_) | Token::String(_) | Token::Array(_) => {}
    }
    word
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::Bytes(b) => encode_bytes(b),
        Token::String(s) => encode_bytes(s.as_bytes()),
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            out.extend(encode(items));
            out
        }
        _ => encode_static(token).to_vec(),
    }
}

fn encode_bytes(b: &[u8]) -> Vec<u8> {
    let mut out = uint_word(b.len() as u128).to_vec();
    out.extend_from_slice(b);
    out.resize(WORD + b.len().div_ceil(WORD) * WORD, 0);
    out
}

fn uint_word(v: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 16..].copy_from_slice(&v.to_be_bytes());
    word
}

/// First four bytes of `keccak256(signature)`.
pub fn selector_from_signature(signature: &str) -> [u8; SELECTOR_LENGTH] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut selector = [0u8; SELECTOR_LENGTH];
    selector.copy_from_slice(&hash[..SELECTOR_LENGTH]);
    selector
}

/// Selector at the start of encoded call data.
pub fn selector_from_data(data: &[u8]) -> Result<[u8; SELECTOR_LENGTH]> {
    data.get(..SELECTOR_LENGTH)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| SigningError::Abi(format!("call data of {} bytes has no selector", data.len())))
}

#[derive(Clone, Debug, Deserialize)]
struct AbiParam {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Clone, Debug, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<AbiParam>,
}

fn function_kind() -> String {
    "function".to_string()
}

/// A contract function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<ParamType>,
}

impl Function {
    /// Canonical signature, e.g. `transfer(address,uint256)`.
    pub fn signature(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(ToString::to_string).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    pub fn selector(&self) -> [u8; SELECTOR_LENGTH] {
        selector_from_signature(&self.signature())
    }

    /// Selector followed by the encoded arguments.
    pub fn encode_input(&self, tokens: &[Token]) -> Result<Vec<u8>> {
        if tokens.len() != self.inputs.len() {
            return Err(SigningError::Abi(format!(
                "{} takes {} arguments, got {}",
                self.name,
                self.inputs.len(),
                tokens.len()
            )));
        }
        if let Some((param, _)) = self.inputs.iter().zip(tokens).find(|(p, t)| !t.matches(p)) {
            return Err(SigningError::Abi(format!("{}: argument does not match {param}", self.name)));
        }

        let mut data = self.selector().to_vec();
        data.extend(encode(tokens));
        Ok(data)
    }
}

/// A deployed contract and its functions.
#[derive(Clone, Debug)]
pub struct Contract {
    pub address: Vec<u8>,
    functions: Vec<Function>,
}

impl Contract {
    pub fn from_json(address: impl Into<Vec<u8>>, json: &str) -> Result<Self> {
        let entries: Vec<AbiEntry> = serde_json::from_str(json)?;

        let functions = entries
            .into_iter()
            .filter(|e| e.kind == "function")
            .map(|e| {
                let inputs = e
                    .inputs
                    .iter()
                    .map(|p| ParamType::parse(&p.kind))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Function { name: e.name, inputs })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            address: address.into(),
            functions,
        })
    }

    /// Load `0x<address>.abi.json`, taking the address from the file name.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SigningError::Abi(format!("invalid ABI path {}", path.display())))?;

        let address = name.split('.').next().unwrap_or_default();
        let address = address.rsplit('x').next().unwrap_or_default();
        let address = hex::decode(address)?;

        let json = std::fs::read_to_string(path)?;
        Self::from_json(address, &json)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Result<&Function> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| SigningError::Abi(format!("no function '{name}'")))
    }

    pub fn encode_call(&self, name: &str, tokens: &[Token]) -> Result<Vec<u8>> {
        self.function(name)?.encode_input(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERC20: &str = r#"[
        {"type": "function", "name": "transfer", "stateMutability": "nonpayable",
         "inputs": [{"name": "to", "type": "address"}, {"name": "value", "type": "uint256"}],
         "outputs": [{"name": "", "type": "bool"}]},
        {"type": "event", "name": "Transfer", "inputs": []}
    ]"#;

    #[test]
    fn test_selectors() {
        assert_eq!("a9059cbb", hex::encode(selector_from_signature("transfer(address,uint256)")));
        assert_eq!(
            "7ff36ab5",
            hex::encode(selector_from_signature("swapExactETHForTokens(uint256,address[],address,uint256)"))
        );
    }

    #[test]
    fn test_parse_types() {
        assert_eq!(ParamType::Uint(256), ParamType::parse("uint").unwrap());
        assert_eq!(ParamType::FixedBytes(4), ParamType::parse("bytes4").unwrap());
        assert_eq!(
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::parse("address[]").unwrap()
        );
        assert_eq!("uint8[]", ParamType::parse("uint8[]").unwrap().to_string());
        assert!(ParamType::parse("uint7").is_err());
        assert!(ParamType::parse("bytes33").is_err());
        assert!(ParamType::parse("tuple").is_err());
    }

    #[test]
    fn test_encode_transfer() {
        let contract = Contract::from_json(vec![], ERC20).unwrap();
        assert_eq!(1, contract.functions().len());

        let to = "573708726db88a32c1b9c828fef508577cfb8483";
        let data = contract
            .encode_call("transfer", &[Token::address_hex(to).unwrap(), Token::Uint(10)])
            .unwrap();

        let expected = format!("a9059cbb{:0>64}{:0>64}", to, "0a");
        assert_eq!(expected, hex::encode(&data));
        assert_eq!([0xa9u8, 0x05, 0x9c, 0xbb], selector_from_data(&data).unwrap());
    }

    #[test]
    fn test_encode_dynamic() {
        let encoded = encode(&[Token::Uint(1), Token::String("abc".to_string())]);

        let expected = [
            format!("{:0>64}", "1"),
            format!("{:0>64}", "40"),
            format!("{:0>64}", "3"),
            format!("{:0<64}", "616263"),
        ]
        .concat();
        assert_eq!(expected, hex::encode(encoded));
    }

    #[test]
    fn test_tron_address_token() {
        let tron = hex::decode("410e1bce983f78f8913002c3f7e52daf78de6da2cb").unwrap();
        let Token::Address(address) = Token::address(&tron).unwrap() else {
            panic!("not an address");
        };
        assert_eq!(tron[1..], address);
        assert!(Token::address(&[0u8; 19]).is_err());
    }

    #[test]
    fn test_argument_mismatch() {
        let contract = Contract::from_json(vec![], ERC20).unwrap();
        assert!(contract.encode_call("transfer", &[Token::Uint(1)]).is_err());
        assert!(contract
            .encode_call("transfer", &[Token::Bool(true), Token::Uint(1)])
            .is_err());
        assert!(contract.function("approve").is_err());
    }
}
