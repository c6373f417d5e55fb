//! # Payjoin sender
//!
//! Negotiate a [BIP 78 Payjoin](https://github.com/bitcoin/bips/blob/master/bip-0078.mediawiki)
//! with a receiver endpoint, verify the receiver's proposal, then sign and broadcast it.
//!
//! The [`Client`] drives one negotiation. It asks a [`Wallet`] for the Original PSBT, sends a
//! sanitized copy through a [`Requester`], checks the returned Payjoin Proposal against the
//! original, hands the merged proposal back to the wallet for signing and broadcasts the result.
//! Whenever the negotiation fails after the original transaction exists, the original is
//! broadcast before the error is returned. On success the original is scheduled for a delayed,
//! best-effort re-broadcast.
//!
//! The checks themselves live in [`send`] and do no IO. They can be used on their own by
//! implementations that bring their own transport or wallet plumbing.
//!
//! ## Disclaimer ⚠️ WIP
//!
//! **Use at your own risk. This crate has not yet been reviewed by independent Rust and Bitcoin
//! security professionals.**

pub extern crate bitcoin;

pub mod client;
pub mod config;
pub mod error;
pub(crate) mod error_codes;
pub(crate) mod into_url;
pub(crate) mod output_substitution;
pub mod params;
pub(crate) mod psbt;
mod request;
pub mod requester;
pub mod script_type;
pub mod send;
pub mod validation;
pub mod wallet;

pub use client::{BuildClientError, Client, Error};
pub use config::ClientConfig;
pub use error::ImplementationError;
pub use error_codes::ErrorCode;
pub use into_url::{Error as IntoUrlError, IntoUrl};
pub use output_substitution::OutputSubstitution;
pub use params::NegotiationParameters;
pub use psbt::FinalizeError;
pub use request::Request;
pub use requester::{EndpointError, HttpRequester, RequestError, Requester};
pub use script_type::{FeeEstimation, ScriptType};
pub use url::{ParseError, Url};
pub use wallet::Wallet;

/// 4M block size limit with base64 encoding overhead => maximum reasonable size of content-length
pub const MAX_CONTENT_LENGTH: usize = 4_000_000 * 4 / 3;
