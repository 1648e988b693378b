use crate::{Address, AsymmetricCipher, Error, KeyPair, PrivateKey, PublicKey, Seed, derive_addresses};

/// A participant's long-term material.
///
/// The seed and private key never leave the device. Both well-known addresses
/// derive deterministically from the seed; the public-key address may advance
/// through collision resolution, the request address is fixed for the life of
/// the account.
pub struct Identity {
    name: String,
    key_pair: KeyPair,
    seed: Seed,
    public_key_address: Address,
    request_address: Address,
}

impl Identity {
    /// Create an identity from a seed.
    ///
    /// The keypair comes from the injected cipher capability; address index 0
    /// becomes the public-key address, index 1 the contact-request inbox.
    pub fn create(
        name: impl Into<String>,
        seed: Seed,
        cipher: &dyn AsymmetricCipher,
    ) -> Result<Self, Error> {
        let key_pair = cipher.generate_key_pair(&seed)?;

        let mut addresses = derive_addresses(&seed, 0, 2)?;
        let request_address = addresses.pop().ok_or_else(derivation_failed)?;
        let public_key_address = addresses.pop().ok_or_else(derivation_failed)?;

        Ok(Self {
            name: name.into(),
            key_pair,
            seed,
            public_key_address,
            request_address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public()
    }

    pub(crate) fn private_key(&self) -> &PrivateKey {
        self.key_pair.private()
    }

    pub(crate) fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Where the public-key announcement lives. Peers need this address to
    /// initiate contact.
    pub fn public_key_address(&self) -> &Address {
        &self.public_key_address
    }

    /// Inbox for contact requests and acceptances.
    pub fn request_address(&self) -> &Address {
        &self.request_address
    }

    pub(crate) fn set_public_key_address(&mut self, address: Address) {
        self.public_key_address = address;
    }
}

fn derivation_failed() -> Error {
    Error::Crypto("identity address derivation failed".to_string())
}
