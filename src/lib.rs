//! Client and test harness for clear-signing Tron contract calls through an
//! external plugin of the Ethereum device application.
//!
//! [`TronClient`] splits signing requests into tagged APDUs and drives the
//! review through a [`Navigator`]; [`EthAppClient`] registers the plugin for
//! a contract beforehand. Signatures are checked with
//! [`verify::check_tx_signature`].

pub mod abi;
pub mod account;
pub mod apdu;
pub mod client;
pub mod config;
pub mod error;
pub mod eth_app;
pub mod mock;
pub mod model;
pub mod navigator;
pub mod path;
pub mod speculos;
pub mod transport;
pub mod verify;

pub use account::Account;
pub use apdu::{APDUErrorCode, ApduAnswer, ApduCommand, StatusWord};
pub use client::TronClient;
pub use config::HarnessConfig;
pub use error::{Result, SigningError};
pub use eth_app::EthAppClient;
pub use mock::{MockDevice, MockNavigator};
pub use model::Model;
pub use navigator::{NavIns, Navigator, Review};
pub use speculos::SpeculosNavigator;
pub use transport::{Exchange, PendingExchange, TcpTransport};
