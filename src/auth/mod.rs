use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, Result};
use crate::events::Event;
use crate::ledger::AccountId;

const EVENT_DOMAIN: &[u8] = b"storage-ledger/event/v1";

/// Host capability deciding whether the current caller may act for an account.
pub trait Authenticator {
    fn require_authenticated_as(&self, account: &AccountId) -> Result<()>;
}

/// The accounts that authorised the current event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Authorization {
    accounts: BTreeSet<AccountId>,
}

impl Authorization {
    pub fn new<I, A>(accounts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AccountId>,
    {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(account: impl Into<AccountId>) -> Self {
        Self::new([account])
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts.iter()
    }
}

impl Authenticator for Authorization {
    fn require_authenticated_as(&self, account: &AccountId) -> Result<()> {
        if self.accounts.contains(account) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(account.clone()))
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSignature {
    pub account: AccountId,
    #[serde(with = "signature_hex")]
    pub signature: Signature,
}

/// An event plus the signatures of the accounts authorising it. The nonce
/// makes otherwise identical events distinct for replay protection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedEvent {
    #[serde(default)]
    pub nonce: u64,
    pub event: Event,
    #[serde(default)]
    pub signatures: Vec<AccountSignature>,
}

impl SignedEvent {
    pub fn new(nonce: u64, event: Event) -> Self {
        Self {
            nonce,
            event,
            signatures: Vec::new(),
        }
    }

    pub fn digest(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(EVENT_DOMAIN);
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(serde_json::to_vec(&self.event)?);
        Ok(hasher.finalize().into())
    }

    /// Adds (or replaces) `account`'s signature.
    pub fn sign(&mut self, account: impl Into<AccountId>, key: &SigningKey) -> Result<()> {
        let account = account.into();
        let digest = self.digest()?;
        let signature = key.sign(&digest);
        self.signatures.retain(|s| s.account != account);
        self.signatures.push(AccountSignature { account, signature });
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid hex for {account}: {source}")]
    Hex {
        account: AccountId,
        source: hex::FromHexError,
    },
    #[error("key for {0} must be 32 bytes")]
    Length(AccountId),
    #[error("invalid verifying key for {0}")]
    Invalid(AccountId),
}

/// Verifying keys of the accounts known to the ledger.
#[derive(Clone, Debug, Default)]
pub struct Keyring {
    keys: BTreeMap<AccountId, VerifyingKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: impl Into<AccountId>, key: VerifyingKey) {
        self.keys.insert(account.into(), key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Builds a keyring from `account -> hex verifying key` pairs.
    pub fn from_hex<'a, I>(entries: I) -> std::result::Result<Self, KeyError>
    where
        I: IntoIterator<Item = (&'a AccountId, &'a String)>,
    {
        let mut keyring = Self::new();
        for (account, key_hex) in entries {
            let bytes = hex::decode(key_hex.trim()).map_err(|source| KeyError::Hex {
                account: account.clone(),
                source,
            })?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| KeyError::Length(account.clone()))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|_| KeyError::Invalid(account.clone()))?;
            keyring.insert(account.clone(), key);
        }
        Ok(keyring)
    }

    /// Checks every signature on `signed` and returns the accounts that
    /// authorised it. Any bad signature rejects the whole event.
    pub fn verify(&self, signed: &SignedEvent) -> Result<Authorization> {
        let digest = signed.digest()?;
        let mut verified = BTreeSet::new();
        for sig in &signed.signatures {
            let key = self
                .keys
                .get(&sig.account)
                .ok_or_else(|| LedgerError::Unauthorized(sig.account.clone()))?;
            key.verify_strict(&digest, &sig.signature)
                .map_err(|_| LedgerError::Unauthorized(sig.account.clone()))?;
            verified.insert(sig.account.clone());
        }
        Ok(Authorization { accounts: verified })
    }
}

/// Signatures travel as exactly `2 * SIGNATURE_LENGTH` hex characters.
mod signature_hex {
    use ed25519_dalek::{Signature, SIGNATURE_LENGTH};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(signature: &Signature, out: S) -> Result<S::Ok, S::Error> {
        out.serialize_str(&hex::encode(signature.to_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(input: D) -> Result<Signature, D::Error> {
        let text = String::deserialize(input)?;
        let mut raw = [0u8; SIGNATURE_LENGTH];
        hex::decode_to_slice(text.trim(), &mut raw).map_err(D::Error::custom)?;
        Ok(Signature::from_bytes(&raw))
    }
}
