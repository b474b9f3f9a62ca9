use thiserror::Error;

#[derive(Debug, Error)]
pub enum MintError {
    #[error("Sale data has not been loaded yet")]
    NotReady,

    #[error("Wallet is not connected")]
    WalletNotConnected,

    #[error("No guard group is open for minting")]
    NoActiveGroup,

    #[error("A mint is already in progress")]
    AlreadyMinting,

    #[error("Quantity {requested} is outside 1..={max}")]
    InvalidQuantity { requested: u32, max: u32 },

    #[error("Wallet cannot mint {quantity} with group '{label}': {failing}")]
    NotEligible {
        label: String,
        quantity: u32,
        failing: String,
    },

    #[error("Could not register the allow list proof: {0}")]
    Preflight(String),

    #[error("{0}")]
    Setup(String),
}

impl MintError {
    pub fn setup(err: impl std::fmt::Display) -> Self {
        MintError::Setup(err.to_string())
    }
}
