use std::fmt;

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use quay_types::constants::{CIPHER_BLOCK_SIZE, IV_SIZE, LENGTH_HEADER_SIZE};
use quay_types::error::QuayError;
use rand::RngCore;
use zeroize::Zeroizing;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric cipher protecting the handshake login payload.
///
/// Ciphertext layout: `[16-byte IV][AES-CBC(frame)]` where
/// `frame = [4-byte BE plaintext length][plaintext][fill]` and the fill brings
/// the frame to a multiple of the block size. Each fill byte holds the fill
/// count.
///
/// The key is fitted once at construction (see [`fit_key`]) and wiped on drop.
pub struct Cipher {
    key: Zeroizing<Vec<u8>>,
}

impl Cipher {
    /// Create a cipher from the raw shared secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Zeroizing::new(fit_key(secret)),
        }
    }

    /// Length of the fitted AES key: 16, 24 or 32.
    pub fn key_len(&self) -> usize {
        self.key.len()
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, QuayError> {
        let mut frame = frame_plaintext(plaintext)?;

        let mut iv = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        match self.key.len() {
            16 => cbc_encrypt::<Aes128CbcEnc>(&self.key, &iv, &mut frame)?,
            24 => cbc_encrypt::<Aes192CbcEnc>(&self.key, &iv, &mut frame)?,
            _ => cbc_encrypt::<Aes256CbcEnc>(&self.key, &iv, &mut frame)?,
        }

        let mut out = Vec::with_capacity(IV_SIZE + frame.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&frame);
        Ok(out)
    }

    /// Decrypt a `[IV][ciphertext]` buffer produced by [`Cipher::encrypt`].
    ///
    /// Malformed input (short, misaligned, or a length header pointing past
    /// the buffer) is reported as [`QuayError::DecryptionFailed`].
    pub fn decrypt(&self, input: &[u8]) -> Result<Vec<u8>, QuayError> {
        if input.len() < IV_SIZE + CIPHER_BLOCK_SIZE {
            return Err(decrypt_error(format!(
                "input too short: {} bytes",
                input.len()
            )));
        }
        let (iv, ciphertext) = input.split_at(IV_SIZE);
        if ciphertext.len() % CIPHER_BLOCK_SIZE != 0 {
            return Err(decrypt_error(format!(
                "ciphertext length {} is not a multiple of {}",
                ciphertext.len(),
                CIPHER_BLOCK_SIZE
            )));
        }

        let mut frame = ciphertext.to_vec();
        match self.key.len() {
            16 => cbc_decrypt::<Aes128CbcDec>(&self.key, iv, &mut frame)?,
            24 => cbc_decrypt::<Aes192CbcDec>(&self.key, iv, &mut frame)?,
            _ => cbc_decrypt::<Aes256CbcDec>(&self.key, iv, &mut frame)?,
        }

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let body = &frame[LENGTH_HEADER_SIZE..];
        if len > body.len() {
            return Err(decrypt_error(format!(
                "length header {} exceeds decrypted body of {} bytes",
                len,
                body.len()
            )));
        }
        Ok(body[..len].to_vec())
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

/// Encrypt with a raw (unfitted) key.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, QuayError> {
    Cipher::new(key).encrypt(plaintext)
}

/// Decrypt with a raw (unfitted) key.
pub fn decrypt(key: &[u8], input: &[u8]) -> Result<Vec<u8>, QuayError> {
    Cipher::new(key).decrypt(input)
}

/// Fit an arbitrary secret to a valid AES key size.
///
/// Keys longer than 32 bytes are truncated. Up to 16 bytes fit AES-128,
/// 17..=23 bytes AES-192, and 24 bytes or more AES-256. Short keys are padded
/// with bytes equal to the pad count.
pub fn fit_key(raw: &[u8]) -> Vec<u8> {
    if raw.len() >= 32 {
        return raw[..32].to_vec();
    }
    let size = if raw.len() <= 16 {
        16
    } else if raw.len() < 24 {
        24
    } else {
        32
    };
    let padding = size - raw.len();
    let mut key = Vec::with_capacity(size);
    key.extend_from_slice(raw);
    key.resize(size, padding as u8);
    key
}

/// Build the block-aligned plaintext frame: `[len][plaintext][fill]`.
///
/// Total length is `ceil((len + 4) / 16) * 16`; the fill count is whatever
/// remains and each fill byte equals it.
pub fn frame_plaintext(plaintext: &[u8]) -> Result<Vec<u8>, QuayError> {
    let len = u32::try_from(plaintext.len()).map_err(|_| QuayError::EncryptionFailed {
        reason: format!("plaintext of {} bytes is too large", plaintext.len()),
    })?;

    let framed = LENGTH_HEADER_SIZE + plaintext.len();
    let total = framed.div_ceil(CIPHER_BLOCK_SIZE) * CIPHER_BLOCK_SIZE;
    let fill = total - framed;

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(plaintext);
    frame.resize(total, fill as u8);
    Ok(frame)
}

fn cbc_encrypt<E>(key: &[u8], iv: &[u8], frame: &mut [u8]) -> Result<(), QuayError>
where
    E: KeyIvInit + BlockEncryptMut,
{
    let len = frame.len();
    E::new_from_slices(key, iv)
        .map_err(|e| QuayError::EncryptionFailed {
            reason: e.to_string(),
        })?
        .encrypt_padded_mut::<NoPadding>(frame, len)
        .map_err(|e| QuayError::EncryptionFailed {
            reason: e.to_string(),
        })?;
    Ok(())
}

fn cbc_decrypt<D>(key: &[u8], iv: &[u8], frame: &mut [u8]) -> Result<(), QuayError>
where
    D: KeyIvInit + BlockDecryptMut,
{
    D::new_from_slices(key, iv)
        .map_err(|e| decrypt_error(e.to_string()))?
        .decrypt_padded_mut::<NoPadding>(frame)
        .map_err(|e| decrypt_error(e.to_string()))?;
    Ok(())
}

fn decrypt_error(reason: impl Into<String>) -> QuayError {
    QuayError::DecryptionFailed {
        reason: reason.into(),
    }
}
