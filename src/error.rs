/// Errors that can occur during contact exchange and chat operations.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// A payload read from the ledger does not match the wire format.
    ///
    /// Always recoverable: readers skip the offending entry, since unrelated
    /// payloads may share an address.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// No public-key announcement was found at the expected address.
    #[error("no contact information present at the address")]
    NoContactInformation,

    /// More than one distinct public-key announcement occupies the address.
    #[error("ambiguous contact information: multiple distinct announcements at the address")]
    AmbiguousContactInformation,

    /// None of the entries at the chat-key address decrypted to key material.
    #[error("chat key material could not be recovered from the chat key address")]
    ChatKeyUnavailable,

    /// Message text exceeds the per-message character limit.
    #[error("message exceeds the {0} character limit")]
    MessageTooLong(usize),

    /// The collision-resolution loop ran out of candidate addresses.
    #[error("address space exhausted after {0} rotation attempts")]
    AddressSpaceExhausted(u32),

    /// A ledger submission or query failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A protocol rule was violated.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A cryptographic operation failed.
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    /// Random number generation failed.
    #[error("random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("serialization/deserialization failed: {0}")]
    Serde(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value.to_string())
    }
}
