//! Sealed audit trail of alerts. One AES-GCM sealed, base64 encoded JSON
//! alert per line. Key is derived from a caller-supplied secret.

use crate::alerts::{Alert, AlertListener};
use crate::error::{AuditError, ListenerError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

fn derive_key(secret: &[u8]) -> [u8; KEY_LEN] {
    use ring::digest;
    let mut out = [0u8; KEY_LEN];
    let h = digest::digest(&digest::SHA256, secret);
    out.copy_from_slice(&h.as_ref()[..KEY_LEN]);
    out
}

fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<String, AuditError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuditError::Cipher)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt((&nonce).into(), plaintext)
        .map_err(|_| AuditError::Cipher)?;
    let mut out = nonce.to_vec();
    out.extend(ciphertext);
    Ok(BASE64.encode(&out))
}

/// Decrypt one audit line back into the alert it recorded.
pub fn open_line(secret: &[u8], line: &str) -> Result<Alert, AuditError> {
    let key = derive_key(secret);
    let raw = BASE64.decode(line.trim())?;
    if raw.len() <= NONCE_LEN {
        return Err(AuditError::Truncated);
    }
    let (nonce, ct) = raw.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| AuditError::Cipher)?;
    let plain = cipher.decrypt(nonce.into(), ct).map_err(|_| AuditError::Cipher)?;
    Ok(serde_json::from_slice(&plain)?)
}

/// Appends sealed alerts to a writer. Register it with
/// `AlertManager::register_listener` to record every new alert.
pub struct SealedAuditLog<W: Write + Send> {
    key: [u8; KEY_LEN],
    out: Mutex<W>,
}

impl SealedAuditLog<BufWriter<File>> {
    /// Open `path` for append, creating it if needed.
    pub fn open(path: &Path, secret: &[u8]) -> Result<Self, AuditError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file), secret))
    }
}

impl<W: Write + Send> SealedAuditLog<W> {
    pub fn new(out: W, secret: &[u8]) -> Self {
        Self {
            key: derive_key(secret),
            out: Mutex::new(out),
        }
    }

    pub fn record(&self, alert: &Alert) -> Result<(), AuditError> {
        let json = serde_json::to_vec(alert)?;
        let line = seal(&self.key, &json)?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> AlertListener for SealedAuditLog<W> {
    fn on_alert(&self, alert: &Alert) -> Result<(), ListenerError> {
        self.record(alert).map_err(|e| ListenerError(e.to_string()))
    }
}
