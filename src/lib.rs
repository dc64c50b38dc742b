//! # tapwallet
//!
//! A pure Rust self-custodial Bitcoin wallet account library. A BIP-39
//! seed phrase and a relative derivation path deterministically produce a
//! single-key Taproot (BIP-86) account; balance, transfer history and
//! payments all go through an Electrum server as the sole chain source.

pub mod error;
pub mod types;
pub mod primitives;
pub mod bip39;
pub mod keys;
pub mod electrum;
pub mod planner;
pub mod builder;
pub mod history;
pub mod account;

pub use account::Account;
pub use electrum::{ChainSource, ElectrumClient};
pub use error::WalletError;
pub use keys::KeyMaterial;
pub use primitives::address::{Address, Network};
pub use types::{ElectrumConfig, Transfer, TransferDirection, TransferQuery};

// A convenience result type
pub type Result<T, E = WalletError> = std::result::Result<T, E>;

/// Initializes the library. This should be called once per process; it
/// only sets up logging.
pub fn init() {
    // It's ok if this fails, it just means logging was already initialized.
    let _ = env_logger::try_init();
    log::debug!("tapwallet initialized");
}
