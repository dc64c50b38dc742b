//! The account façade: binds key material and a chain source, and
//! exposes the public wallet operations.

use crate::bip39::Seed;
use crate::builder::{self, BuiltTransaction, DUST_LIMIT};
use crate::electrum::{ChainSource, ElectrumClient};
use crate::history;
use crate::keys::KeyMaterial;
use crate::planner;
use crate::primitives::address::Address;
use crate::types::{ElectrumConfig, SendQuote, SendReceipt, Transfer, TransferQuery};
use crate::{Result, WalletError};
use std::sync::Arc;

/// Accounts are active until disposed; a disposed account keeps only its
/// address.
enum AccountState {
    Active {
        keys: KeyMaterial,
        chain: Arc<dyn ChainSource>,
    },
    Disposed,
}

/// A single-key Taproot account over one Electrum connection.
pub struct Account {
    state: AccountState,
    address: Address,
}

impl Account {
    /// Create an account from a mnemonic phrase. The phrase and path are
    /// validated here; no I/O happens until the first chain operation.
    pub fn from_mnemonic(
        phrase: &str,
        path_suffix: &str,
        config: ElectrumConfig,
    ) -> Result<Self> {
        let keys = KeyMaterial::from_mnemonic(phrase, path_suffix, config.network)?;
        let chain: Arc<dyn ChainSource> = Arc::new(ElectrumClient::new(config));
        Ok(Self::with_chain(keys, chain))
    }

    /// Create an account from a raw 64-byte seed.
    pub fn from_seed(seed: &Seed, path_suffix: &str, config: ElectrumConfig) -> Result<Self> {
        let keys = KeyMaterial::from_seed(seed, path_suffix, config.network)?;
        let chain: Arc<dyn ChainSource> = Arc::new(ElectrumClient::new(config));
        Ok(Self::with_chain(keys, chain))
    }

    /// Bind key material to an arbitrary chain source. Tests use this to
    /// run against a scripted backend.
    pub fn with_chain(keys: KeyMaterial, chain: Arc<dyn ChainSource>) -> Self {
        let address = keys.address().clone();
        Account {
            state: AccountState::Active { keys, chain },
            address,
        }
    }

    fn active(&self) -> Result<(&KeyMaterial, &Arc<dyn ChainSource>)> {
        match &self.state {
            AccountState::Active { keys, chain } => Ok((keys, chain)),
            AccountState::Disposed => Err(WalletError::Disposed),
        }
    }

    /// The account's Taproot address. Available even after disposal.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The absolute derivation path, e.g. `m/86'/1'/0'/0/0`.
    pub fn path(&self) -> Result<&str> {
        Ok(self.active()?.0.path())
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, AccountState::Disposed)
    }

    /// Confirmed balance in satoshis.
    pub async fn balance(&self) -> Result<u64> {
        let (_, chain) = self.active()?;
        Ok(chain.script_balance(&self.address).await?.confirmed)
    }

    /// Sign an arbitrary message with the account key.
    pub fn sign_message(&self, message: &str) -> Result<String> {
        self.active()?.0.sign_message(message)
    }

    /// Verify a signature produced by [`Account::sign_message`].
    pub fn verify_message(&self, message: &str, signature_hex: &str) -> Result<bool> {
        self.active()?.0.verify_message(message, signature_hex)
    }

    /// Build and sign a payment without broadcasting it.
    pub async fn quote_send(&self, to: &str, value: u64) -> Result<SendQuote> {
        let built = self.build_payment(to, value).await?;
        Ok(SendQuote {
            txid: built.txid,
            fee: built.fee,
            vsize: built.vsize,
        })
    }

    /// Build, sign and broadcast a payment.
    pub async fn send_transaction(&self, to: &str, value: u64) -> Result<SendReceipt> {
        let (_, chain) = self.active()?;
        let built = self.build_payment(to, value).await?;
        let txid = chain.broadcast(&built.raw_hex).await?;
        if txid != built.txid {
            log::warn!(
                "server reported txid {} for locally computed {}",
                txid,
                built.txid
            );
        }
        Ok(SendReceipt {
            txid,
            fee: built.fee,
        })
    }

    async fn build_payment(&self, to: &str, value: u64) -> Result<BuiltTransaction> {
        let (keys, chain) = self.active()?;

        // Everything that can fail without I/O fails first.
        if value <= DUST_LIMIT {
            return Err(WalletError::AmountBelowDust);
        }
        let recipient: Address = to.parse()?;
        if recipient.network != keys.network() {
            return Err(WalletError::InvalidInput(format!(
                "recipient address {} is for another network",
                to
            )));
        }

        let fee_rate = chain.estimate_fee_per_vbyte().await?;
        let utxos = planner::collect_utxos(chain.as_ref(), &self.address, value).await?;
        builder::build_signed(keys, &utxos, &recipient, value, fee_rate)
    }

    /// Enumerate value transfers involving this account, newest first.
    pub async fn get_transfers(&self, query: &TransferQuery) -> Result<Vec<Transfer>> {
        let (_, chain) = self.active()?;
        history::resolve_transfers(chain.as_ref(), &self.address, query).await
    }

    /// Token transfers are not a bitcoin concept.
    pub async fn transfer(&self) -> Result<()> {
        Err(WalletError::Unsupported("transfer"))
    }

    /// Token transfers are not a bitcoin concept.
    pub async fn quote_transfer(&self) -> Result<()> {
        Err(WalletError::Unsupported("quote_transfer"))
    }

    /// Token balances are not a bitcoin concept.
    pub async fn token_balance(&self) -> Result<()> {
        Err(WalletError::Unsupported("token_balance"))
    }

    /// Wipe key material and drop the connection. Further operations
    /// (other than [`Account::address`]) fail with `Disposed`.
    pub fn dispose(&mut self) {
        if let AccountState::Active { keys, .. } = &mut self.state {
            keys.dispose();
        }
        self.state = AccountState::Disposed;
        log::debug!("account {} disposed", self.address);
    }
}
