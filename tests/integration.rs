use std::sync::Arc;
use std::time::Duration;

use tanglegram::memory::{MemoryCache, MemoryLedger};
use tanglegram::{
    CachedLedger, ChatCipher, ChatSession, ContactExchange, ContactStatus, Contacts, Error,
    Identity, Ledger, ProtocolConfig, SealedBox, Seed, codec, spawn_poller,
};

fn cached_ledger(backend: &Arc<MemoryLedger>) -> CachedLedger {
    CachedLedger::new(backend.clone(), Arc::new(MemoryCache::new()))
}

fn exchange_for(backend: &Arc<MemoryLedger>) -> ContactExchange {
    ContactExchange::new(
        cached_ledger(backend),
        Arc::new(SealedBox::new()),
        ProtocolConfig::default(),
    )
}

#[tokio::test]
async fn test_full_protocol_flow() {
    // Both parties talk to the same ledger through their own cache
    let backend = Arc::new(MemoryLedger::new());
    let alice_exchange = exchange_for(&backend);
    let bob_exchange = exchange_for(&backend);

    println!("Step 1: Creating identities for Alice and Bob...");
    let cipher = SealedBox::new();
    let mut alice = Identity::create("alice", Seed::generate().unwrap(), &cipher).unwrap();
    let mut bob = Identity::create("bob", Seed::generate().unwrap(), &cipher).unwrap();

    println!("Step 2: Both publish their public keys...");
    alice_exchange.publish_identity(&mut alice).await.unwrap();
    bob_exchange.publish_identity(&mut bob).await.unwrap();

    println!("Step 3: Bob resolves Alice's announcement and sends a request...");
    let mut bob_contacts = Contacts::new();
    let bob_view_of_alice = bob_exchange
        .send_contact_request(&bob, alice.public_key_address())
        .await
        .unwrap();
    assert_eq!(bob_view_of_alice.status, ContactStatus::Pending);
    bob_contacts.upsert(bob_view_of_alice);

    println!("Step 4: Alice finds exactly one pending request from Bob...");
    let mut requests = alice_exchange
        .receive_contact_requests(&alice, &Contacts::new())
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    let mut alice_view_of_bob = requests.remove(0);
    assert_eq!(alice_view_of_bob.name, "bob");

    println!("Step 5: Alice accepts the request...");
    alice_exchange
        .accept_contact_request(&alice, &mut alice_view_of_bob)
        .await
        .unwrap();
    assert_eq!(alice_view_of_bob.status, ContactStatus::Approved);

    println!("Step 6: Bob processes the acceptance...");
    let bob_view_of_alice = bob_contacts
        .get_mut(alice.public_key_address())
        .unwrap();
    let approved = bob_exchange
        .process_acceptance(&bob, bob_view_of_alice)
        .await
        .unwrap();
    assert!(approved);
    assert_eq!(bob_view_of_alice.status, ContactStatus::Approved);
    assert_eq!(bob_view_of_alice.name, "alice");
    assert_eq!(bob_view_of_alice.chat_address, alice_view_of_bob.chat_address);

    println!("Step 7: Opening chat sessions on both sides...");
    let mut alice_session = ChatSession::new(
        &alice,
        &alice_view_of_bob,
        cached_ledger(&backend),
        Arc::new(ChatCipher::new()),
        ProtocolConfig::default(),
    )
    .unwrap();
    let mut bob_session = ChatSession::new(
        &bob,
        bob_contacts.get(alice.public_key_address()).unwrap(),
        cached_ledger(&backend),
        Arc::new(ChatCipher::new()),
        ProtocolConfig::default(),
    )
    .unwrap();
    assert_eq!(alice_session.current_address(), bob_session.current_address());

    println!("Step 8: Alice greets Bob...");
    alice_session.send_message("hello").await.unwrap();

    let received = bob_session.poll_messages().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text, "hello");
    assert!(received[0].from_peer);

    println!("Step 9: Bob replies...");
    bob_session.send_message("hi alice!").await.unwrap();

    let replies: Vec<_> = alice_session
        .poll_messages()
        .await
        .unwrap()
        .into_iter()
        .filter(|message| message.from_peer)
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].text, "hi alice!");

    println!("Step 10: An oversized message is rejected before submission...");
    let result = alice_session.send_message(&"x".repeat(150)).await;
    assert_eq!(result.unwrap_err(), Error::MessageTooLong(codec::CHARACTER_LIMIT));
}

#[tokio::test]
async fn test_chat_addresses_rotate_in_step() {
    let backend = Arc::new(MemoryLedger::new());
    let alice_exchange = exchange_for(&backend);
    let bob_exchange = exchange_for(&backend);

    let cipher = SealedBox::new();
    let mut alice = Identity::create("alice", Seed::generate().unwrap(), &cipher).unwrap();
    let mut bob = Identity::create("bob", Seed::generate().unwrap(), &cipher).unwrap();
    alice_exchange.publish_identity(&mut alice).await.unwrap();
    bob_exchange.publish_identity(&mut bob).await.unwrap();

    let mut bob_view = bob_exchange
        .send_contact_request(&bob, alice.public_key_address())
        .await
        .unwrap();
    let mut requests = alice_exchange
        .receive_contact_requests(&alice, &Contacts::new())
        .await
        .unwrap();
    let mut alice_view = requests.remove(0);
    alice_exchange
        .accept_contact_request(&alice, &mut alice_view)
        .await
        .unwrap();
    bob_exchange
        .process_acceptance(&bob, &mut bob_view)
        .await
        .unwrap();

    let config = ProtocolConfig::default();
    let mut alice_session = ChatSession::new(
        &alice,
        &alice_view,
        cached_ledger(&backend),
        Arc::new(ChatCipher::new()),
        config.clone(),
    )
    .unwrap();
    let mut bob_session = ChatSession::new(
        &bob,
        &bob_view,
        cached_ledger(&backend),
        Arc::new(ChatCipher::new()),
        config.clone(),
    )
    .unwrap();
    let original = alice_session.current_address().clone();

    // Exactly the configured number of completed messages on the address
    for index in 0..config.messages_on_address {
        alice_session
            .send_message(&format!("message {index}"))
            .await
            .unwrap();
    }
    let delivered = bob_session.poll_messages().await.unwrap();
    assert_eq!(delivered.len(), config.messages_on_address as usize);
    alice_session.poll_messages().await.unwrap();

    // Both sides derived the identical successor without communicating it
    assert_ne!(alice_session.current_address(), &original);
    assert_eq!(
        alice_session.current_address(),
        bob_session.current_address()
    );

    // And the conversation continues on the rotated address
    bob_session.send_message("still here?").await.unwrap();
    let received = alice_session.poll_messages().await.unwrap();
    assert!(received.iter().any(|message| message.text == "still here?"));
}

#[tokio::test]
async fn test_collision_forces_republication_elsewhere() {
    let backend = Arc::new(MemoryLedger::new());
    let alice_exchange = exchange_for(&backend);
    let bob_exchange = exchange_for(&backend);

    let cipher = SealedBox::new();
    let mut alice = Identity::create("alice", Seed::generate().unwrap(), &cipher).unwrap();
    let mut bob = Identity::create("bob", Seed::generate().unwrap(), &cipher).unwrap();
    alice_exchange.publish_identity(&mut alice).await.unwrap();
    bob_exchange.publish_identity(&mut bob).await.unwrap();
    let original = alice.public_key_address().clone();

    // A second, distinct key lands on Alice's announced address
    let mallory = Identity::create("mallory", Seed::generate().unwrap(), &cipher).unwrap();
    let forged = codec::encode_key_announcement(mallory.public_key(), mallory.request_address())
        .unwrap();
    backend
        .submit(&original, &forged, codec::TRANSACTION_TAG)
        .await
        .unwrap();

    // Bob's resolution now refuses to pick one
    let result = bob_exchange.send_contact_request(&bob, &original).await;
    assert_eq!(result.unwrap_err(), Error::AmbiguousContactInformation);

    // Alice republished at a fresh address distinct from the burned one
    alice_exchange.publish_identity(&mut alice).await.unwrap();
    assert_ne!(alice.public_key_address(), &original);

    // Contact through the new address works
    let contact = bob_exchange
        .send_contact_request(&bob, alice.public_key_address())
        .await
        .unwrap();
    assert_eq!(contact.status, ContactStatus::Pending);
}

#[tokio::test]
async fn test_background_poller_reports_new_messages() {
    let backend = Arc::new(MemoryLedger::new());
    let alice_exchange = exchange_for(&backend);
    let bob_exchange = exchange_for(&backend);

    let cipher = SealedBox::new();
    let mut alice = Identity::create("alice", Seed::generate().unwrap(), &cipher).unwrap();
    let mut bob = Identity::create("bob", Seed::generate().unwrap(), &cipher).unwrap();
    alice_exchange.publish_identity(&mut alice).await.unwrap();
    bob_exchange.publish_identity(&mut bob).await.unwrap();

    let mut bob_view = bob_exchange
        .send_contact_request(&bob, alice.public_key_address())
        .await
        .unwrap();
    let mut requests = alice_exchange
        .receive_contact_requests(&alice, &Contacts::new())
        .await
        .unwrap();
    let mut alice_view = requests.remove(0);
    alice_exchange
        .accept_contact_request(&alice, &mut alice_view)
        .await
        .unwrap();
    bob_exchange
        .process_acceptance(&bob, &mut bob_view)
        .await
        .unwrap();

    let config = ProtocolConfig {
        poll_interval: Duration::from_millis(20),
        ..ProtocolConfig::default()
    };
    let mut alice_session = ChatSession::new(
        &alice,
        &alice_view,
        cached_ledger(&backend),
        Arc::new(ChatCipher::new()),
        config.clone(),
    )
    .unwrap();
    let bob_session = ChatSession::new(
        &bob,
        &bob_view,
        cached_ledger(&backend),
        Arc::new(ChatCipher::new()),
        config,
    )
    .unwrap();

    let (mut messages, handle) = spawn_poller(bob_session);
    alice_session.send_message("are you there?").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.text, "are you there?");
    assert!(received.from_peer);

    handle.stop().await.unwrap();
}
