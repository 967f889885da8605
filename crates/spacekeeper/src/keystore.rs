//! Disk-backed [`PoCWallet`] implementation.
//!
//! Secret material is kept as per-key 32-byte entropy in a single
//! SCALE-encoded file next to a digest of the wallet password. Keypairs are
//! derived from entropy on unlock and dropped again on lock.

use crate::wallet::{PoCWallet, WalletError};
use parity_scale_codec::{Decode, Encode};
use parking_lot::Mutex;
use poc_primitives::{PublicKey, POC_SIGNING_CONTEXT};
use schnorrkel::context::SigningContext;
use schnorrkel::{ExpansionMode, Keypair, MiniSecretKey, Signature};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

const KEYSTORE_FILE_NAME: &str = "keystore.bin";

/// Entropy used for key generation.
const ENTROPY_LENGTH: usize = 32;

#[derive(Encode, Decode)]
struct KeystoreFileContents {
    password_digest: [u8; 32],
    entropies: Vec<Vec<u8>>,
}

fn keypair_from_entropy(entropy: &[u8]) -> Result<Keypair, WalletError> {
    let mini_secret = MiniSecretKey::from_bytes(entropy)
        .map_err(|error| WalletError::Corrupted(error.to_string()))?;
    Ok(mini_secret.expand_to_keypair(ExpansionMode::Ed25519))
}

struct Unlocked {
    keypairs: Vec<Zeroizing<Keypair>>,
    ordinals: HashMap<PublicKey, u32>,
}

struct KeystoreState {
    password_digest: [u8; 32],
    entropies: Vec<Zeroizing<Vec<u8>>>,
    unlocked: Option<Unlocked>,
}

/// Wallet persisting key entropy under a base directory.
pub struct Keystore {
    file: PathBuf,
    context: SigningContext,
    state: Mutex<KeystoreState>,
}

impl fmt::Debug for Keystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystore")
            .field("file", &self.file)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl Keystore {
    /// Opens the keystore in `base_directory`, creating an empty one guarded
    /// by `password` when none exists. The keystore starts locked either way.
    pub fn open_or_create<B: AsRef<Path>>(
        base_directory: B,
        password: &[u8],
    ) -> Result<Self, WalletError> {
        let file = base_directory.as_ref().join(KEYSTORE_FILE_NAME);

        let contents = if file.exists() {
            debug!("opening existing keystore");
            let bytes = Zeroizing::new(fs::read(&file)?);
            KeystoreFileContents::decode(&mut bytes.as_slice())
                .map_err(|error| WalletError::Corrupted(error.to_string()))?
        } else {
            debug!("creating new keystore");
            let contents = KeystoreFileContents {
                password_digest: *blake3::hash(password).as_bytes(),
                entropies: Vec::new(),
            };
            fs::write(&file, contents.encode())?;
            contents
        };

        let KeystoreFileContents {
            password_digest,
            entropies,
        } = contents;

        Ok(Self {
            file,
            context: schnorrkel::signing_context(POC_SIGNING_CONTEXT),
            state: Mutex::new(KeystoreState {
                password_digest,
                entropies: entropies.into_iter().map(Zeroizing::new).collect(),
                unlocked: None,
            }),
        })
    }

    /// Number of keys managed by this keystore.
    pub fn key_count(&self) -> usize {
        self.state.lock().entropies.len()
    }

    fn persist(state: &KeystoreState, file: &Path) -> Result<(), WalletError> {
        let contents = KeystoreFileContents {
            password_digest: state.password_digest,
            entropies: state.entropies.iter().map(|entropy| entropy.to_vec()).collect(),
        };
        fs::write(file, contents.encode())?;
        Ok(())
    }
}

impl PoCWallet for Keystore {
    fn generate_new_public_key(&self) -> Result<(PublicKey, u32), WalletError> {
        let mut state = self.state.lock();
        if state.unlocked.is_none() {
            return Err(WalletError::Locked);
        }

        let entropy = Zeroizing::new(rand::random::<[u8; ENTROPY_LENGTH]>().to_vec());
        let keypair = keypair_from_entropy(&entropy)?;
        let public_key = PublicKey::from(keypair.public);
        let ordinal = state.entropies.len() as u32;

        state.entropies.push(entropy);
        Self::persist(&state, &self.file)?;

        let unlocked = state.unlocked.as_mut().expect("checked above; qed");
        unlocked.keypairs.push(Zeroizing::new(keypair));
        unlocked.ordinals.insert(public_key, ordinal);

        Ok((public_key, ordinal))
    }

    fn public_key_ordinal(&self, public_key: &PublicKey) -> Option<u32> {
        self.state
            .lock()
            .unlocked
            .as_ref()
            .and_then(|unlocked| unlocked.ordinals.get(public_key).copied())
    }

    fn sign_message(
        &self,
        public_key: &PublicKey,
        message: &[u8],
    ) -> Result<Signature, WalletError> {
        let state = self.state.lock();
        let unlocked = state.unlocked.as_ref().ok_or(WalletError::Locked)?;
        let ordinal = *unlocked
            .ordinals
            .get(public_key)
            .ok_or(WalletError::KeyNotFound)?;
        let keypair = &unlocked.keypairs[ordinal as usize];
        Ok(keypair.sign(self.context.bytes(message)))
    }

    fn unlock(&self, password: &[u8]) -> Result<(), WalletError> {
        let mut state = self.state.lock();
        if *blake3::hash(password).as_bytes() != state.password_digest {
            return Err(WalletError::WrongPassword);
        }
        if state.unlocked.is_some() {
            return Ok(());
        }

        let mut keypairs = Vec::with_capacity(state.entropies.len());
        let mut ordinals = HashMap::with_capacity(state.entropies.len());
        for (index, entropy) in state.entropies.iter().enumerate() {
            let keypair = keypair_from_entropy(entropy)?;
            ordinals.insert(PublicKey::from(keypair.public), index as u32);
            keypairs.push(Zeroizing::new(keypair));
        }

        state.unlocked.replace(Unlocked { keypairs, ordinals });
        Ok(())
    }

    fn lock(&self) {
        self.state.lock().unlocked.take();
    }

    fn is_locked(&self) -> bool {
        self.state.lock().unlocked.is_none()
    }
}
