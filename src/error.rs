use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid seed phrase: {0}")]
    InvalidSeedPhrase(String),

    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Amount is at or below the dust limit")]
    AmountBelowDust,

    #[error("Address has no unspent outputs")]
    NoUnspent,

    #[error("Insufficient balance to cover amount and fee")]
    InsufficientBalance,

    #[error("{0} is not supported for bitcoin accounts")]
    Unsupported(&'static str),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Connection attempt timed out")]
    ConnectTimeout,

    #[error("Electrum error: {0}")]
    Rpc(String),

    #[error("Account has been disposed")]
    Disposed,

    #[error("Invalid tweak for taproot key")]
    InvalidTweak,

    #[error("Network connection failed: {0}")]
    Network(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),
}
