use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    Address, CachedLedger, ChatKeyMaterial, Contact, ContactStatus, Error, Identity,
    ProtocolConfig, SymmetricCipher, TransactionHash, Trytes, codec, next_chat_address,
};

/// A decrypted chat message as returned by a poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    /// Sender-embedded millisecond timestamp; the ledger itself provides no
    /// ordering.
    pub timestamp: u64,
    pub from_peer: bool,
}

/// An established chat with one approved contact.
///
/// The session owns the shared key material and the current chat address,
/// tracks which transactions have already been delivered, and rotates the
/// address after the configured number of completed messages. Sessions for
/// different contacts are independent and may run concurrently.
pub struct ChatSession {
    ledger: CachedLedger,
    cipher: Arc<dyn SymmetricCipher>,
    pub(crate) config: ProtocolConfig,
    material: ChatKeyMaterial,
    local_tag: Trytes,
    peer_tag: Trytes,
    current_address: Address,
    previous_address: Option<Address>,
    rotation_index: u32,
    messages_on_current: u32,
    last_timestamp: u64,
    consumed: HashSet<TransactionHash>,
}

impl ChatSession {
    /// Open a session for an approved contact.
    pub fn new(
        identity: &Identity,
        contact: &Contact,
        ledger: CachedLedger,
        cipher: Arc<dyn SymmetricCipher>,
        config: ProtocolConfig,
    ) -> Result<Self, Error> {
        if contact.status != ContactStatus::Approved {
            return Err(Error::Protocol("contact is not approved".to_string()));
        }
        let chat_address = contact
            .chat_address
            .clone()
            .ok_or_else(|| Error::Protocol("contact has no chat address".to_string()))?;
        let material = contact
            .chat_key()
            .cloned()
            .ok_or_else(|| Error::Protocol("contact has no chat key material".to_string()))?;

        Ok(Self {
            ledger,
            cipher,
            config,
            material,
            local_tag: codec::sender_tag(identity.public_key()),
            peer_tag: codec::sender_tag(&contact.public_key),
            current_address: chat_address,
            previous_address: None,
            rotation_index: 0,
            messages_on_current: 0,
            last_timestamp: 0,
            consumed: HashSet::new(),
        })
    }

    /// The address messages are currently exchanged on.
    pub fn current_address(&self) -> &Address {
        &self.current_address
    }

    /// How often the chat address has rotated within this session.
    pub fn rotation_index(&self) -> u32 {
        self.rotation_index
    }

    /// Encrypt and submit a message to the current chat address.
    ///
    /// Rejects text over [`codec::CHARACTER_LIMIT`] characters without
    /// submitting anything. The message is written as two fragments; each
    /// submission retries up to the configured budget with linear backoff
    /// before the failure is returned.
    pub async fn send_message(&mut self, text: &str) -> Result<(), Error> {
        if text.chars().count() > codec::CHARACTER_LIMIT {
            return Err(Error::MessageTooLong(codec::CHARACTER_LIMIT));
        }

        // Strictly monotonic per sender, so two quick messages never share a
        // pairing group
        let timestamp = now_millis()?.max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;

        let ciphertext = self.cipher.encrypt(&self.material, text.as_bytes())?;
        let (first, continuation) =
            codec::fragment_message(&Trytes::from_bytes(&ciphertext), &self.local_tag, timestamp)?;

        self.submit_with_retry(&first).await?;
        self.submit_with_retry(&continuation).await?;

        debug!(address = %self.current_address, timestamp, "sent message");
        Ok(())
    }

    async fn submit_with_retry(&self, payload: &Trytes) -> Result<TransactionHash, Error> {
        let mut attempt = 1u32;
        loop {
            match self
                .ledger
                .submit(&self.current_address, payload, codec::TRANSACTION_TAG)
                .await
            {
                Ok(hash) => return Ok(hash),
                Err(err) if attempt < self.config.submit_retries => {
                    warn!(attempt, %err, "submission failed, backing off");
                    sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch, pair and decrypt messages not yet delivered, ordered by their
    /// embedded timestamps.
    ///
    /// Messages from both parties are returned; `from_peer` tells them
    /// apart. Noise and undecryptable entries are skipped, lone fragments
    /// stay pending for the next poll. Crossing the configured per-address
    /// message count rotates the chat address; the previous address stays on
    /// the poll list until traffic shows up on the successor.
    pub async fn poll_messages(&mut self) -> Result<Vec<ChatMessage>, Error> {
        let mut bundles = Vec::new();
        if let Some(previous) = &self.previous_address {
            bundles.extend(self.ledger.read(previous).await?);
        }
        bundles.extend(self.ledger.read(&self.current_address).await?);

        let mut address_of: HashMap<TransactionHash, Address> = HashMap::new();
        let mut fragments = Vec::new();
        for bundle in bundles {
            if self.consumed.contains(&bundle.hash) {
                continue;
            }
            if bundle.tag != codec::TRANSACTION_TAG {
                self.consumed.insert(bundle.hash);
                continue;
            }
            match codec::ChatFragment::decode(&bundle.payload) {
                Ok(fragment) => {
                    if fragment.sender_tag != self.local_tag
                        && fragment.sender_tag != self.peer_tag
                    {
                        // Someone else's traffic on this address
                        self.consumed.insert(bundle.hash);
                        continue;
                    }
                    address_of.insert(bundle.hash.clone(), bundle.address.clone());
                    fragments.push((bundle.hash, fragment));
                }
                Err(err) => {
                    debug!(hash = %bundle.hash, %err, "skipping non-fragment payload");
                    self.consumed.insert(bundle.hash);
                }
            }
        }

        let mut messages = Vec::new();
        let mut traffic_on_current = false;
        for paired in codec::pair_fragments(fragments) {
            for source in &paired.sources {
                self.consumed.insert(source.clone());
            }

            let Ok(sealed) = paired.ciphertext.to_bytes() else {
                continue;
            };
            let Ok(plaintext) = self.cipher.decrypt(&self.material, &sealed) else {
                debug!(timestamp = paired.timestamp, "skipping undecryptable message");
                continue;
            };
            let Ok(text) = String::from_utf8(plaintext) else {
                continue;
            };

            let on_current = paired
                .sources
                .iter()
                .all(|hash| address_of.get(hash) == Some(&self.current_address));
            if on_current {
                self.messages_on_current += 1;
                traffic_on_current = true;
            }

            messages.push(ChatMessage {
                text,
                timestamp: paired.timestamp,
                from_peer: paired.sender_tag == self.peer_tag,
            });
        }

        if traffic_on_current && self.previous_address.take().is_some() {
            debug!(address = %self.current_address, "previous chat address drained");
        }

        messages.sort_by_key(|message| message.timestamp);

        if self.messages_on_current >= self.config.messages_on_address {
            self.rotate()?;
        }

        Ok(messages)
    }

    /// Advance to the next derived chat address.
    ///
    /// Both parties derive the same successor from the shared key material,
    /// the previous address and the rotation index, with no coordination.
    fn rotate(&mut self) -> Result<(), Error> {
        let next = next_chat_address(&self.material, &self.current_address, self.rotation_index + 1)?;
        debug!(from = %self.current_address, to = %next, "rotating chat address");

        self.previous_address = Some(std::mem::replace(&mut self.current_address, next));
        self.rotation_index += 1;
        self.messages_on_current = 0;
        Ok(())
    }
}

fn now_millis() -> Result<u64, Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .map_err(|_| Error::Protocol("system clock is before the unix epoch".to_string()))
}
