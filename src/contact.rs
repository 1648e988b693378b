use serde::{Deserialize, Serialize};

use crate::{Address, ChatKeyMaterial, PublicKey};

/// Lifecycle of a contact relationship.
///
/// A contact transitions to `Approved` exactly once; `Rejected` is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    Pending,
    Approved,
    Rejected,
}

/// The relationship between the local identity and one peer.
///
/// Uniquely identified by the peer's public-key address; the chat addresses
/// and key material appear once the contact is approved.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub public_key: PublicKey,
    pub public_key_address: Address,
    pub request_address: Address,
    pub chat_address: Option<Address>,
    pub chat_key_address: Option<Address>,
    pub status: ContactStatus,
    /// Shared chat key, re-derivable from the chat-key address. Never
    /// serialized.
    #[serde(skip)]
    pub(crate) chat_key: Option<ChatKeyMaterial>,
}

impl Contact {
    pub fn chat_key(&self) -> Option<&ChatKeyMaterial> {
        self.chat_key.as_ref()
    }
}

/// Structured payload exchanged at request addresses.
///
/// One address hosts both record kinds; the tag field disambiguates and
/// anything else at the address is skipped as noise.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContactRecord {
    /// Asks the receiver to enter a contact relationship.
    Request {
        name: String,
        public_key: PublicKey,
        public_key_address: Address,
        request_address: Address,
    },
    /// Confirms a request and announces the chat channel.
    Acceptance {
        name: String,
        public_key: PublicKey,
        public_key_address: Address,
        chat_address: Address,
        chat_key_address: Address,
    },
}

/// The local identity's contact list.
///
/// Holds at most one non-rejected contact per peer public-key address.
#[derive(Default)]
pub struct Contacts {
    entries: Vec<Contact>,
}

impl Contacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a contact.
    ///
    /// A rejected entry absorbs any later state for the same peer. Otherwise
    /// the new state replaces the old one, so repeating a request leaves a
    /// single entry.
    pub fn upsert(&mut self, contact: Contact) {
        match self
            .entries
            .iter_mut()
            .find(|known| known.public_key_address == contact.public_key_address)
        {
            Some(known) => {
                if known.status != ContactStatus::Rejected {
                    *known = contact;
                }
            }
            None => self.entries.push(contact),
        }
    }

    pub fn get(&self, public_key_address: &Address) -> Option<&Contact> {
        self.entries
            .iter()
            .find(|contact| &contact.public_key_address == public_key_address)
    }

    pub fn get_mut(&mut self, public_key_address: &Address) -> Option<&mut Contact> {
        self.entries
            .iter_mut()
            .find(|contact| &contact.public_key_address == public_key_address)
    }

    pub fn contains(&self, public_key_address: &Address) -> bool {
        self.get(public_key_address).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
