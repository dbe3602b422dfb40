use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result, anyhow, bail};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use core_types::SessionStorage;
use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const SCHEMA_VERSION: u32 = 1;
const PLAIN_FILE: &str = "session.json";
const SEALED_FILE: &str = "session.enc.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("encrypted session store exists but no password provided")]
    MissingPassword,
}

/// File-backed key/value store for credentials and scope state.
///
/// Values are kept in a single document so that a batch removal is one write.
/// With a password set the document is sealed with AES-256-GCM under an
/// Argon2-derived key.
#[derive(Debug, Clone)]
pub struct SecretStore {
    root: PathBuf,
    password: Option<String>,
    write_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlainDocument {
    schema_version: u32,
    values: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedDocument {
    schema_version: u32,
    salt_b64: String,
    nonce_b64: String,
    ciphertext_b64: String,
}

impl SecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            password: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn is_encrypted_mode(&self) -> bool {
        self.password.is_some()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut values = self.load()?;
        if apply(&mut values) {
            self.save(&values)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let plain = self.root.join(PLAIN_FILE);
        let sealed = self.root.join(SEALED_FILE);

        match (self.password.as_deref(), sealed.exists(), plain.exists()) {
            (Some(password), true, _) => {
                let doc: SealedDocument = read_json(&sealed)?;
                doc.open(password)
            }
            (None, true, false) => Err(StoreError::MissingPassword.into()),
            (_, _, true) => {
                let doc: PlainDocument = read_json(&plain)?;
                Ok(doc.values)
            }
            (_, false, false) => Ok(BTreeMap::new()),
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        let (target, stale, text) = match self.password.as_deref() {
            Some(password) => (
                SEALED_FILE,
                PLAIN_FILE,
                serde_json::to_string_pretty(&SealedDocument::seal(password, values)?)?,
            ),
            None => (
                PLAIN_FILE,
                SEALED_FILE,
                serde_json::to_string_pretty(&PlainDocument {
                    schema_version: SCHEMA_VERSION,
                    values: values.clone(),
                })?,
            ),
        };

        let path = self.root.join(target);
        fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
        let stale = self.root.join(stale);
        if stale.exists() {
            fs::remove_file(&stale).ok();
        }
        debug!(entries = values.len(), sealed = self.is_encrypted_mode(), "session store persisted");
        Ok(())
    }
}

impl SessionStorage for SecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| values.remove(key).is_some())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        self.update(|values| {
            let before = values.len();
            values.retain(|key, _| !keys.contains(&key.as_str()));
            values.len() != before
        })
    }
}

impl SealedDocument {
    fn seal(password: &str, values: &BTreeMap<String, String>) -> Result<Self> {
        let mut salt = [0u8; 16];
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let plaintext = serde_json::to_vec(values)?;
        let ciphertext = cipher_for(password, &salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| anyhow!("failed to encrypt session store: {e}"))?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            salt_b64: BASE64.encode(salt),
            nonce_b64: BASE64.encode(nonce),
            ciphertext_b64: BASE64.encode(ciphertext),
        })
    }

    fn open(&self, password: &str) -> Result<BTreeMap<String, String>> {
        let salt = BASE64.decode(&self.salt_b64)?;
        let nonce = BASE64.decode(&self.nonce_b64)?;
        let ciphertext = BASE64.decode(&self.ciphertext_b64)?;
        if nonce.len() != 12 {
            bail!("invalid nonce length");
        }

        let plaintext = cipher_for(password, &salt)?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| anyhow!("failed to decrypt session store: {e}"))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn cipher_for(password: &str, salt: &[u8]) -> Result<Aes256Gcm> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow!("failed to derive encryption key: {e}"))?;
    Aes256Gcm::new_from_slice(&key).context("failed to build cipher")
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn default_session_dir_from(base_dir: &Path) -> PathBuf {
    base_dir.join("session")
}
