use std::sync::Arc;

use tracing::debug;
use zeroize::Zeroize;

use crate::{
    Address, AsymmetricCipher, CachedLedger, ChatKeyMaterial, Contact, ContactRecord,
    ContactStatus, Contacts, Error, Identity, ProtocolConfig, PublicKey, codec,
};

/// Orchestrates the contact handshake over the ledger.
///
/// Every operation is driven by the caller and suspends at each ledger
/// access. The exchange holds no identity state; the acting identity is
/// passed into each call.
pub struct ContactExchange {
    pub(crate) ledger: CachedLedger,
    pub(crate) cipher: Arc<dyn AsymmetricCipher>,
    pub(crate) config: ProtocolConfig,
}

impl ContactExchange {
    pub fn new(
        ledger: CachedLedger,
        cipher: Arc<dyn AsymmetricCipher>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            ledger,
            cipher,
            config,
        }
    }

    /// Publish the identity's public-key announcement at its well-known
    /// address.
    ///
    /// Idempotent: if the announcement is already present nothing is
    /// submitted. If the readback finds announcements from anyone else, the
    /// address is burned and the identity moves to a freshly derived one
    /// before publishing.
    pub async fn publish_identity(&self, identity: &mut Identity) -> Result<(), Error> {
        let own = (
            identity.public_key().clone(),
            identity.request_address().clone(),
        );
        let occupants = self.announcements_at(identity.public_key_address()).await?;

        let foreign = occupants.iter().any(|pair| pair != &own);
        if foreign {
            let fresh = self.resolve_collision(identity).await?;
            debug!(address = %fresh, "moving announcement to fresh address");
            identity.set_public_key_address(fresh);
        } else if occupants.contains(&own) {
            debug!(address = %identity.public_key_address(), "announcement already published");
            return Ok(());
        }

        let payload =
            codec::encode_key_announcement(identity.public_key(), identity.request_address())?;
        self.ledger
            .submit(
                identity.public_key_address(),
                &payload,
                codec::TRANSACTION_TAG,
            )
            .await?;

        debug!(address = %identity.public_key_address(), "published identity");
        Ok(())
    }

    /// Distinct announcements found at an address. Payloads that do not
    /// decode as announcements are skipped.
    pub(crate) async fn announcements_at(
        &self,
        address: &Address,
    ) -> Result<Vec<(PublicKey, Address)>, Error> {
        let bundles = self.ledger.read(address).await?;

        let mut distinct: Vec<(PublicKey, Address)> = Vec::new();
        for bundle in bundles {
            match codec::decode_key_announcement(&bundle.payload) {
                Ok(pair) => {
                    if !distinct.contains(&pair) {
                        distinct.push(pair);
                    }
                }
                Err(err) => {
                    debug!(hash = %bundle.hash, %err, "skipping non-announcement payload");
                }
            }
        }

        Ok(distinct)
    }

    /// Resolve a peer's public key and request address from their announced
    /// public-key address.
    ///
    /// Exactly one distinct announcement must be present: zero yields
    /// [`Error::NoContactInformation`], more than one
    /// [`Error::AmbiguousContactInformation`] (somebody republished, replayed
    /// or squatted the address).
    pub async fn resolve_contact(&self, address: &Address) -> Result<(PublicKey, Address), Error> {
        let mut distinct = self.announcements_at(address).await?;
        match distinct.len() {
            0 => Err(Error::NoContactInformation),
            1 => Ok(distinct.remove(0)),
            _ => Err(Error::AmbiguousContactInformation),
        }
    }

    /// Resolve a peer and submit a contact request to their inbox.
    ///
    /// Returns the pending contact; merging it into the caller's contact
    /// list keeps repeated requests down to a single entry.
    pub async fn send_contact_request(
        &self,
        identity: &Identity,
        peer_public_key_address: &Address,
    ) -> Result<Contact, Error> {
        let (peer_key, peer_request_address) =
            self.resolve_contact(peer_public_key_address).await?;

        let record = ContactRecord::Request {
            name: identity.name().to_string(),
            public_key: identity.public_key().clone(),
            public_key_address: identity.public_key_address().clone(),
            request_address: identity.request_address().clone(),
        };
        let payload = codec::encode_contact_record(&record)?;
        self.ledger
            .submit(&peer_request_address, &payload, codec::TRANSACTION_TAG)
            .await?;

        debug!(peer = %peer_public_key_address, "sent contact request");

        Ok(Contact {
            // The peer's display name arrives with their acceptance
            name: String::new(),
            public_key: peer_key,
            public_key_address: peer_public_key_address.clone(),
            request_address: peer_request_address,
            chat_address: None,
            chat_key_address: None,
            status: ContactStatus::Pending,
            chat_key: None,
        })
    }

    /// Read the identity's inbox and return contact requests awaiting a
    /// decision.
    ///
    /// Requests from peers already approved or rejected are filtered out;
    /// undecodable payloads and other record kinds are skipped.
    pub async fn receive_contact_requests(
        &self,
        identity: &Identity,
        known: &Contacts,
    ) -> Result<Vec<Contact>, Error> {
        let bundles = self.ledger.read(identity.request_address()).await?;

        let mut pending: Vec<Contact> = Vec::new();
        for bundle in bundles {
            if bundle.tag != codec::TRANSACTION_TAG {
                continue;
            }
            let record = match codec::decode_contact_record(&bundle.payload) {
                Ok(record) => record,
                Err(err) => {
                    debug!(hash = %bundle.hash, %err, "skipping non-record payload");
                    continue;
                }
            };

            let ContactRecord::Request {
                name,
                public_key,
                public_key_address,
                request_address,
            } = record
            else {
                continue;
            };

            if public_key_address == *identity.public_key_address() {
                continue;
            }
            if let Some(existing) = known.get(&public_key_address) {
                if existing.status != ContactStatus::Pending {
                    continue;
                }
            }
            if pending
                .iter()
                .any(|contact| contact.public_key_address == public_key_address)
            {
                continue;
            }

            pending.push(Contact {
                name,
                public_key,
                public_key_address,
                request_address,
                chat_address: None,
                chat_key_address: None,
                status: ContactStatus::Pending,
                chat_key: None,
            });
        }

        debug!(count = pending.len(), "received contact requests");
        Ok(pending)
    }

    /// Accept a pending contact request.
    ///
    /// Allocates fresh chat and chat-key addresses, deposits the chat key
    /// material at the chat-key address (one copy sealed to each party), and
    /// announces the acceptance at the requester's inbox.
    pub async fn accept_contact_request(
        &self,
        identity: &Identity,
        contact: &mut Contact,
    ) -> Result<(), Error> {
        if contact.status != ContactStatus::Pending {
            return Err(Error::Protocol(
                "contact is not pending approval".to_string(),
            ));
        }

        let chat_address = Address::random()?;
        let chat_key_address = Address::random()?;
        let material = ChatKeyMaterial::generate()?;

        let mut secret = material.to_bytes();
        let result = self
            .deposit_chat_key(identity, contact, &chat_key_address, &secret)
            .await;
        secret.zeroize();
        result?;

        let record = ContactRecord::Acceptance {
            name: identity.name().to_string(),
            public_key: identity.public_key().clone(),
            public_key_address: identity.public_key_address().clone(),
            chat_address: chat_address.clone(),
            chat_key_address: chat_key_address.clone(),
        };
        let payload = codec::encode_contact_record(&record)?;
        self.ledger
            .submit(&contact.request_address, &payload, codec::TRANSACTION_TAG)
            .await?;

        contact.chat_address = Some(chat_address);
        contact.chat_key_address = Some(chat_key_address);
        contact.chat_key = Some(material);
        contact.status = ContactStatus::Approved;

        debug!(peer = %contact.public_key_address, "accepted contact request");
        Ok(())
    }

    async fn deposit_chat_key(
        &self,
        identity: &Identity,
        contact: &Contact,
        chat_key_address: &Address,
        secret: &[u8],
    ) -> Result<(), Error> {
        for recipient in [&contact.public_key, identity.public_key()] {
            let sealed = self.cipher.encrypt(recipient, secret)?;
            let payload = codec::encode_chat_key(&sealed)?;
            self.ledger
                .submit(chat_key_address, &payload, codec::TRANSACTION_TAG)
                .await?;
        }
        Ok(())
    }

    /// Check the identity's inbox for an acceptance of the given pending
    /// contact.
    ///
    /// Returns `true` once the acceptance was found and the contact moved to
    /// `Approved` with the announced chat channel adopted and the chat key
    /// recovered; `false` while the peer has not answered yet.
    pub async fn process_acceptance(
        &self,
        identity: &Identity,
        contact: &mut Contact,
    ) -> Result<bool, Error> {
        if contact.status == ContactStatus::Approved {
            return Ok(true);
        }

        let bundles = self.ledger.read(identity.request_address()).await?;
        for bundle in bundles {
            if bundle.tag != codec::TRANSACTION_TAG {
                continue;
            }
            let Ok(record) = codec::decode_contact_record(&bundle.payload) else {
                continue;
            };

            let ContactRecord::Acceptance {
                name,
                public_key,
                public_key_address,
                chat_address,
                chat_key_address,
            } = record
            else {
                continue;
            };
            if public_key_address != contact.public_key_address {
                continue;
            }

            let material = self.recover_chat_key(identity, &chat_key_address).await?;

            contact.name = name;
            contact.public_key = public_key;
            contact.chat_address = Some(chat_address);
            contact.chat_key_address = Some(chat_key_address);
            contact.chat_key = Some(material);
            contact.status = ContactStatus::Approved;

            debug!(peer = %contact.public_key_address, "contact approved");
            return Ok(true);
        }

        Ok(false)
    }

    /// Recover the chat key material deposited at a chat-key address.
    ///
    /// Tries to open every entry with the identity's private key; the first
    /// one that opens wins. Fails with [`Error::ChatKeyUnavailable`] when
    /// nothing decrypts, which callers surface rather than retry.
    pub async fn recover_chat_key(
        &self,
        identity: &Identity,
        chat_key_address: &Address,
    ) -> Result<ChatKeyMaterial, Error> {
        let bundles = self.ledger.read(chat_key_address).await?;

        for bundle in bundles {
            let Ok(sealed) = codec::decode_chat_key(&bundle.payload) else {
                continue;
            };
            let Ok(mut secret) = self.cipher.decrypt(identity.private_key(), &sealed) else {
                continue;
            };
            let material = ChatKeyMaterial::from_bytes(&secret);
            secret.zeroize();
            if let Ok(material) = material {
                return Ok(material);
            }
        }

        Err(Error::ChatKeyUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryLedger};
    use crate::{SealedBox, Seed, Trytes};

    fn exchange() -> ContactExchange {
        let ledger = CachedLedger::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCache::new()),
        );
        ContactExchange::new(ledger, Arc::new(SealedBox::new()), ProtocolConfig::default())
    }

    fn identity(name: &str, byte: u8) -> Identity {
        Identity::create(name, Seed::from([byte; 32]), &SealedBox::new()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);

        exchange.publish_identity(&mut alice).await.unwrap();
        exchange.publish_identity(&mut alice).await.unwrap();

        let occupants = exchange
            .announcements_at(alice.public_key_address())
            .await
            .unwrap();
        assert_eq!(occupants.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_empty_address() {
        let exchange = exchange();
        let alice = identity("alice", 1);

        let result = exchange.resolve_contact(alice.public_key_address()).await;
        assert_eq!(result.unwrap_err(), Error::NoContactInformation);
    }

    #[tokio::test]
    async fn test_resolve_single_announcement() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        exchange.publish_identity(&mut alice).await.unwrap();

        let (key, request_address) = exchange
            .resolve_contact(alice.public_key_address())
            .await
            .unwrap();

        assert_eq!(&key, alice.public_key());
        assert_eq!(&request_address, alice.request_address());
    }

    #[tokio::test]
    async fn test_resolve_detects_collision() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        exchange.publish_identity(&mut alice).await.unwrap();

        // A second, distinct announcement lands on Alice's address
        let mallory = identity("mallory", 2);
        let forged =
            codec::encode_key_announcement(mallory.public_key(), mallory.request_address())
                .unwrap();
        exchange
            .ledger
            .submit(alice.public_key_address(), &forged, codec::TRANSACTION_TAG)
            .await
            .unwrap();

        let result = exchange.resolve_contact(alice.public_key_address()).await;
        assert_eq!(result.unwrap_err(), Error::AmbiguousContactInformation);
    }

    #[tokio::test]
    async fn test_resolution_skips_noise() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        exchange.publish_identity(&mut alice).await.unwrap();

        // Garbage at the same address must not break resolution
        exchange
            .ledger
            .submit(
                alice.public_key_address(),
                &Trytes::from_bytes(b"not an announcement"),
                "SOMEOTHERAPP999999999999999",
            )
            .await
            .unwrap();

        let (key, _) = exchange
            .resolve_contact(alice.public_key_address())
            .await
            .unwrap();
        assert_eq!(&key, alice.public_key());
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        let mut bob = identity("bob", 2);
        exchange.publish_identity(&mut alice).await.unwrap();
        exchange.publish_identity(&mut bob).await.unwrap();

        let contact = exchange
            .send_contact_request(&bob, alice.public_key_address())
            .await
            .unwrap();
        assert_eq!(contact.status, ContactStatus::Pending);

        let requests = exchange
            .receive_contact_requests(&alice, &Contacts::new())
            .await
            .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].name, "bob");
        assert_eq!(&requests[0].public_key_address, bob.public_key_address());
    }

    #[tokio::test]
    async fn test_repeated_requests_collapse() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        let mut bob = identity("bob", 2);
        exchange.publish_identity(&mut alice).await.unwrap();
        exchange.publish_identity(&mut bob).await.unwrap();

        let mut contacts = Contacts::new();
        for _ in 0..2 {
            let contact = exchange
                .send_contact_request(&bob, alice.public_key_address())
                .await
                .unwrap();
            contacts.upsert(contact);
        }
        assert_eq!(contacts.len(), 1);

        // The receiver also sees a single pending request
        let requests = exchange
            .receive_contact_requests(&alice, &Contacts::new())
            .await
            .unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_accept_and_process_acceptance() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        let mut bob = identity("bob", 2);
        exchange.publish_identity(&mut alice).await.unwrap();
        exchange.publish_identity(&mut bob).await.unwrap();

        let mut bob_contact = exchange
            .send_contact_request(&bob, alice.public_key_address())
            .await
            .unwrap();

        let mut requests = exchange
            .receive_contact_requests(&alice, &Contacts::new())
            .await
            .unwrap();
        let mut alice_contact = requests.remove(0);
        exchange
            .accept_contact_request(&alice, &mut alice_contact)
            .await
            .unwrap();
        assert_eq!(alice_contact.status, ContactStatus::Approved);

        let approved = exchange
            .process_acceptance(&bob, &mut bob_contact)
            .await
            .unwrap();
        assert!(approved);
        assert_eq!(bob_contact.status, ContactStatus::Approved);
        assert_eq!(bob_contact.name, "alice");
        assert_eq!(bob_contact.chat_address, alice_contact.chat_address);

        // Both parties hold identical chat key material
        let alice_key = alice_contact.chat_key().unwrap();
        let bob_key = bob_contact.chat_key().unwrap();
        assert_eq!(alice_key.to_bytes(), bob_key.to_bytes());
    }

    #[tokio::test]
    async fn test_acceptance_not_yet_present() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        let mut bob = identity("bob", 2);
        exchange.publish_identity(&mut alice).await.unwrap();
        exchange.publish_identity(&mut bob).await.unwrap();

        let mut contact = exchange
            .send_contact_request(&bob, alice.public_key_address())
            .await
            .unwrap();

        let approved = exchange
            .process_acceptance(&bob, &mut contact)
            .await
            .unwrap();
        assert!(!approved);
        assert_eq!(contact.status, ContactStatus::Pending);
    }

    #[tokio::test]
    async fn test_chat_key_unavailable_for_stranger() {
        let exchange = exchange();
        let mut alice = identity("alice", 1);
        let mut bob = identity("bob", 2);
        let eve = identity("eve", 3);
        exchange.publish_identity(&mut alice).await.unwrap();
        exchange.publish_identity(&mut bob).await.unwrap();

        let mut bob_contact = exchange
            .send_contact_request(&bob, alice.public_key_address())
            .await
            .unwrap();
        let mut requests = exchange
            .receive_contact_requests(&alice, &Contacts::new())
            .await
            .unwrap();
        let mut alice_contact = requests.remove(0);
        exchange
            .accept_contact_request(&alice, &mut alice_contact)
            .await
            .unwrap();
        exchange
            .process_acceptance(&bob, &mut bob_contact)
            .await
            .unwrap();

        // Eve cannot open either sealed copy
        let result = exchange
            .recover_chat_key(&eve, &bob_contact.chat_key_address.clone().unwrap())
            .await;
        assert_eq!(result.unwrap_err(), Error::ChatKeyUnavailable);
    }

    #[tokio::test]
    async fn test_accept_requires_pending_contact() {
        let exchange = exchange();
        let alice = identity("alice", 1);

        let mut contact = Contact {
            name: "bob".to_string(),
            public_key: identity("bob", 2).public_key().clone(),
            public_key_address: identity("bob", 2).public_key_address().clone(),
            request_address: identity("bob", 2).request_address().clone(),
            chat_address: None,
            chat_key_address: None,
            status: ContactStatus::Rejected,
            chat_key: None,
        };

        let result = exchange.accept_contact_request(&alice, &mut contact).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
