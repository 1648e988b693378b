use std::fmt;

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Seed};

const SEALED_BOX_SALT: &[u8] = b"Tanglegram-Sealed-Box-v1";
const CHAT_CIPHER_INFO: &[u8] = b"Tanglegram-Chat-Message-v1";

const NONCE_LEN: usize = 12;
const X25519_KEY_LEN: usize = 32;

pub(crate) fn generate_random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut bytes = [0u8; N];
    OsRng.try_fill_bytes(&mut bytes).map_err(|_| Error::Random)?;
    Ok(bytes)
}

/// A peer's public encryption key, opaque to the protocol layer.
///
/// Any scheme producing fixed-size serializable public keys fits; the
/// protocol only moves the bytes around.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for PublicKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&BASE64.encode(&self.0)).finish()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|err| serde::de::Error::custom(err.to_string()))?;
        Ok(Self(bytes))
    }
}

/// A private decryption key. Zeroed on drop, never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for PrivateKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// An asymmetric keypair owned by an identity.
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    pub fn new(public: PublicKey, private: PrivateKey) -> Self {
        Self { public, private }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }
}

/// Symmetric key material shared by the two parties of a chat.
///
/// Generated once by the accepting side, transported asymmetrically encrypted
/// at the chat-key address, and re-derivable from there at any time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChatKeyMaterial {
    key: [u8; 32],
    salt: [u8; 16],
}

impl fmt::Debug for ChatKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatKeyMaterial").finish_non_exhaustive()
    }
}

impl ChatKeyMaterial {
    pub const ENCODED_LEN: usize = 48;

    /// Generate fresh random key material.
    pub fn generate() -> Result<Self, Error> {
        Ok(Self {
            key: generate_random_bytes()?,
            salt: generate_random_bytes()?,
        })
    }

    pub fn from_parts(key: [u8; 32], salt: [u8; 16]) -> Self {
        Self { key, salt }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn salt(&self) -> &[u8; 16] {
        &self.salt
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[..32].copy_from_slice(&self.key);
        bytes[32..].copy_from_slice(&self.salt);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(Error::Crypto(format!(
                "chat key material must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[..32]);
        let mut salt = [0u8; 16];
        salt.copy_from_slice(&bytes[32..]);

        Ok(Self { key, salt })
    }
}

/// Asymmetric encryption capability.
///
/// The protocol treats the scheme as a black box; the default implementation
/// is [`SealedBox`].
pub trait AsymmetricCipher: Send + Sync {
    fn generate_key_pair(&self, seed: &Seed) -> Result<KeyPair, Error>;

    fn encrypt(&self, public_key: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    fn decrypt(&self, private_key: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Symmetric encryption capability for chat messages.
pub trait SymmetricCipher: Send + Sync {
    fn encrypt(&self, material: &ChatKeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    fn decrypt(&self, material: &ChatKeyMaterial, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Sealed-box construction over X25519 and AES-256-GCM-SIV.
///
/// Encryption generates an ephemeral X25519 key, derives an AEAD key from the
/// Diffie-Hellman result via HKDF, and prepends the ephemeral public key and
/// nonce to the ciphertext.
#[derive(Default)]
pub struct SealedBox;

impl SealedBox {
    pub fn new() -> Self {
        Self
    }

    fn derive_aead_key(
        shared_secret: &[u8; 32],
        ephemeral_public: &[u8; 32],
        recipient_public: &[u8; 32],
    ) -> Result<[u8; 32], Error> {
        let mut ikm = Vec::with_capacity(96);
        ikm.extend_from_slice(shared_secret);
        ikm.extend_from_slice(ephemeral_public);
        ikm.extend_from_slice(recipient_public);

        let hkdf = Hkdf::<Sha256>::new(Some(SEALED_BOX_SALT), &ikm);
        ikm.zeroize();

        let mut key = [0u8; 32];
        hkdf.expand(b"sealed-box-key", &mut key)
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;
        Ok(key)
    }

    fn fixed_key(bytes: &[u8]) -> Result<[u8; X25519_KEY_LEN], Error> {
        bytes
            .try_into()
            .map_err(|_| Error::Crypto("invalid X25519 key length".to_string()))
    }
}

impl AsymmetricCipher for SealedBox {
    fn generate_key_pair(&self, seed: &Seed) -> Result<KeyPair, Error> {
        let secret = StaticSecret::from(*seed.as_bytes());
        let public = x25519_dalek::PublicKey::from(&secret);

        Ok(KeyPair::new(
            PublicKey::from(public.as_bytes().to_vec()),
            PrivateKey::from(secret.to_bytes().to_vec()),
        ))
    }

    fn encrypt(&self, public_key: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let recipient_bytes = Self::fixed_key(public_key.as_bytes())?;
        let recipient = x25519_dalek::PublicKey::from(recipient_bytes);

        let ephemeral = StaticSecret::from(generate_random_bytes::<32>()?);
        let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);

        let mut shared = ephemeral.diffie_hellman(&recipient).to_bytes();
        let mut key = Self::derive_aead_key(&shared, ephemeral_public.as_bytes(), &recipient_bytes)?;
        shared.zeroize();

        let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|err| Error::Crypto(err.to_string()))?;
        key.zeroize();

        let nonce = generate_random_bytes::<NONCE_LEN>()?;
        let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce), plaintext)?;

        let mut sealed = Vec::with_capacity(X25519_KEY_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(ephemeral_public.as_bytes());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, private_key: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < X25519_KEY_LEN + NONCE_LEN {
            return Err(Error::Crypto("sealed box too short".to_string()));
        }

        let ephemeral_bytes = Self::fixed_key(&ciphertext[..X25519_KEY_LEN])?;
        let ephemeral = x25519_dalek::PublicKey::from(ephemeral_bytes);
        let nonce = &ciphertext[X25519_KEY_LEN..X25519_KEY_LEN + NONCE_LEN];
        let sealed = &ciphertext[X25519_KEY_LEN + NONCE_LEN..];

        let secret = StaticSecret::from(Self::fixed_key(private_key.as_bytes())?);
        let recipient_public = x25519_dalek::PublicKey::from(&secret);

        let mut shared = secret.diffie_hellman(&ephemeral).to_bytes();
        let mut key =
            Self::derive_aead_key(&shared, &ephemeral_bytes, recipient_public.as_bytes())?;
        shared.zeroize();

        let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|err| Error::Crypto(err.to_string()))?;
        key.zeroize();

        Ok(cipher.decrypt(Nonce::from_slice(nonce), sealed)?)
    }
}

/// AES-256-GCM-SIV chat message cipher keyed from [`ChatKeyMaterial`].
#[derive(Default)]
pub struct ChatCipher;

impl ChatCipher {
    pub fn new() -> Self {
        Self
    }

    fn derive_message_key(material: &ChatKeyMaterial) -> Result<[u8; 32], Error> {
        let hkdf = Hkdf::<Sha256>::new(Some(material.salt()), material.key());
        let mut key = [0u8; 32];
        hkdf.expand(CHAT_CIPHER_INFO, &mut key)
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;
        Ok(key)
    }
}

impl SymmetricCipher for ChatCipher {
    fn encrypt(&self, material: &ChatKeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut key = Self::derive_message_key(material)?;
        let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|err| Error::Crypto(err.to_string()))?;
        key.zeroize();

        let nonce = generate_random_bytes::<NONCE_LEN>()?;
        let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce), plaintext)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, material: &ChatKeyMaterial, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".to_string()));
        }

        let mut key = Self::derive_message_key(material)?;
        let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|err| Error::Crypto(err.to_string()))?;
        key.zeroize();

        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        Ok(cipher.decrypt(Nonce::from_slice(nonce), sealed)?)
    }
}
