use poc_primitives::PublicKey;
use schnorrkel::Signature;
use std::io;
use thiserror::Error;

/// Errors produced by a wallet implementation.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Operation requires the wallet to be unlocked
    #[error("poc wallet is locked")]
    Locked,
    /// Supplied password does not match the wallet
    #[error("wrong wallet password")]
    WrongPassword,
    /// Public key is not managed by this wallet
    #[error("public key is not in the wallet")]
    KeyNotFound,
    /// Persisted wallet data failed validation
    #[error("wallet data is corrupted: {0}")]
    Corrupted(String),
    /// Underlying I/O failure
    #[error("wallet I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Key management seam of the keeper.
///
/// A wallet issues public keys with dense ordinals, signs messages with the
/// corresponding secret keys and can be locked, dropping all secret material
/// from memory until unlocked with the password again.
pub trait PoCWallet: Send + Sync {
    /// Issues a fresh public key and returns it with its ordinal.
    fn generate_new_public_key(&self) -> Result<(PublicKey, u32), WalletError>;

    /// Ordinal of a managed public key, `None` when unknown or locked.
    fn public_key_ordinal(&self, public_key: &PublicKey) -> Option<u32>;

    /// Signs `message` with the secret key behind `public_key`.
    fn sign_message(
        &self,
        public_key: &PublicKey,
        message: &[u8],
    ) -> Result<Signature, WalletError>;

    /// Unlocks the wallet, deriving keypairs from persisted material.
    fn unlock(&self, password: &[u8]) -> Result<(), WalletError>;

    /// Locks the wallet, dropping secret material from memory.
    fn lock(&self);

    /// Whether the wallet is currently locked.
    fn is_locked(&self) -> bool;
}
