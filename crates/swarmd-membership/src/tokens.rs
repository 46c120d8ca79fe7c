//! Join token issuance and validation.
//!
//! By design a token is not bound to a specific node identity, and
//! revoking it only removes
//! it from the local set — an in-flight handshake that already decoded the
//! token is not retroactively invalidated (`validate` is a pure function
//! of the current token set, it holds no session state to revoke).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::crypto::{decode_token_text, generate_token, hash_token};

/// A single issued token as tracked for the list/revoke API surface.
#[derive(Clone, Debug)]
pub struct TokenRecord {
    pub text: String,
    hash: [u8; 32],
}

pub struct TokenStore {
    secret: [u8; 32],
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl TokenStore {
    pub fn new(secret: [u8; 32]) -> Self {
        Self {
            secret,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Generates and stores a new token, returning the text shown to the
    /// operator.
    pub fn issue(&self) -> String {
        let (raw, text) = generate_token();
        let hash = hash_token(&self.secret, &raw);
        self.tokens.write().unwrap().insert(
            text.clone(),
            TokenRecord {
                text: text.clone(),
                hash,
            },
        );
        text
    }

    /// Registers a token that was generated elsewhere (e.g. bootstrap).
    pub fn insert(&self, text: String) {
        if let Ok(raw) = decode_token_text(&text) {
            let hash = hash_token(&self.secret, &raw);
            self.tokens
                .write()
                .unwrap()
                .insert(text.clone(), TokenRecord { text, hash });
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.tokens.read().unwrap().keys().cloned().collect()
    }

    /// Removes a token from the known set. Does not affect any handshake
    /// already in progress (see module docs).
    pub fn revoke(&self, text: &str) -> bool {
        self.tokens.write().unwrap().remove(text).is_some()
    }

    /// True iff `candidate` is accepted as a valid join token: the set is
    /// empty (bootstrap, first-node semantics), the text matches a known
    /// token exactly, or its decoded bytes reproduce a stored hash.
    pub fn validate(&self, candidate: &str) -> bool {
        let tokens = self.tokens.read().unwrap();
        if tokens.is_empty() {
            return true;
        }
        if tokens.contains_key(candidate) {
            return true;
        }
        match decode_token_text(candidate) {
            Ok(raw) => {
                let candidate_hash = hash_token(&self.secret, &raw);
                tokens.values().any(|record| record.hash == candidate_hash)
            }
            Err(_) => false,
        }
    }
}
