//! Integration tests for multi-path messaging
//!
//! All scenarios run over the in-memory overlay: two clients exchanging
//! request/reply traffic, redundant delivery across four paths, partial
//! construction with refused addresses, and close semantics.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use braid_client::{ClientConfig, ClientError, MultiClient};
use braid_core::{Account, Envelope, OverlayNetwork, Payload, PayloadKind};
use braid_harness::MemoryOverlay;

async fn client(
    overlay: &MemoryOverlay,
    account: &Account,
    identifier: &str,
    num_subclients: usize,
    include_original: bool,
) -> MultiClient {
    MultiClient::new(
        Arc::new(overlay.clone()) as Arc<dyn OverlayNetwork>,
        account,
        identifier,
        num_subclients,
        include_original,
        ClientConfig::testing(),
    )
    .await
    .expect("client construction")
}

// ----------------------------------------------------------------------------
// Two-Client Echo
// ----------------------------------------------------------------------------

#[tokio::test]
async fn two_client_echo_with_duplicate_destination() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();

    let alice = client(&overlay, &account, "alice", 0, true).await;
    let bob = client(&overlay, &account, "bob", 0, true).await;
    alice.wait_for_connect().await.unwrap();
    bob.wait_for_connect().await.unwrap();

    let bob_addr = bob.address().to_string();
    let alice_addr = alice.address().to_string();

    let handler = {
        let bob = bob.clone();
        tokio::spawn(async move {
            let msg = bob.recv().await.unwrap();
            assert_eq!(msg.data, b"Hello");
            assert_eq!(msg.src, alice_addr, "src must be untagged");
            assert!(msg.encrypted);
            msg.reply(Some(b"world")).await.unwrap();
            // The duplicate destination must not surface a second copy.
            timeout(Duration::from_millis(100), bob.recv()).await
        })
    };

    let response = timeout(
        Duration::from_secs(2),
        alice.send(&[&bob_addr, &bob_addr], b"Hello", true, 0),
    )
    .await
    .expect("send must not hang")
    .unwrap();

    assert_eq!(response.data, b"world");
    assert_eq!(response.src, bob_addr, "response src must be untagged");

    let duplicate = handler.await.unwrap();
    assert!(duplicate.is_err(), "bob must see the message exactly once");
}

#[tokio::test]
async fn multipath_echo_surfaces_the_reply_exactly_once() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();

    // Four paths on both ends: the request fans out over all of alice's
    // subclients and bob's reply is broadcast back across all of his, so
    // four reply copies land on alice.
    let alice = client(&overlay, &account, "alice", 3, true).await;
    let bob = client(&overlay, &account, "bob", 3, true).await;
    alice.wait_for_connect().await.unwrap();
    bob.wait_for_connect().await.unwrap();

    let bob_addr = bob.address().to_string();
    let handler = {
        let bob = bob.clone();
        tokio::spawn(async move {
            let msg = bob.recv().await.unwrap();
            assert_eq!(msg.data, b"Hello");
            msg.reply(Some(b"world")).await.unwrap();
            // The request arrived over four paths but surfaces once.
            timeout(Duration::from_millis(150), bob.recv()).await
        })
    };

    let response = timeout(
        Duration::from_secs(2),
        alice.send(&[&bob_addr], b"Hello", true, 0),
    )
    .await
    .expect("send must not hang")
    .unwrap();
    assert_eq!(response.data, b"world");
    assert_eq!(response.src, bob_addr);

    // The remaining reply copies must neither resolve the request twice
    // nor surface as inbound application messages.
    let straggler = timeout(Duration::from_millis(200), alice.recv()).await;
    assert!(
        straggler.is_err(),
        "late reply copies must be suppressed, got {:?}",
        straggler
    );

    let duplicate_request = handler.await.unwrap();
    assert!(
        duplicate_request.is_err(),
        "bob must see the request exactly once"
    );
}

#[tokio::test]
async fn reply_without_data_is_an_ack_echoing_the_request_pid() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();

    let alice = client(&overlay, &account, "alice", 0, true).await;
    let bob = client(&overlay, &account, "bob", 0, true).await;

    let handler = {
        let bob = bob.clone();
        tokio::spawn(async move {
            let msg = bob.recv().await.unwrap();
            msg.reply(None).await.unwrap();
            msg.pid
        })
    };

    let bob_addr = bob.address().to_string();
    let response = timeout(
        Duration::from_secs(2),
        alice.send(&[&bob_addr], b"ping", false, 0),
    )
    .await
    .unwrap()
    .unwrap();

    let request_pid = handler.await.unwrap();
    assert_eq!(response.kind, PayloadKind::Ack);
    assert_eq!(response.pid, request_pid);
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn text_round_trip() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();

    let alice = client(&overlay, &account, "alice", 0, true).await;
    let bob = client(&overlay, &account, "bob", 0, true).await;

    {
        let bob = bob.clone();
        tokio::spawn(async move {
            let msg = bob.recv().await.unwrap();
            assert_eq!(msg.text(), Some("hello?"));
            msg.reply_text("hello!").await.unwrap();
        });
    }

    let bob_addr = bob.address().to_string();
    let response = timeout(
        Duration::from_secs(2),
        alice.send_text(&[&bob_addr], "hello?", true, 0),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.kind, PayloadKind::Text);
    assert_eq!(response.text(), Some("hello!"));
}

// ----------------------------------------------------------------------------
// Multi-Path Deduplication
// ----------------------------------------------------------------------------

#[tokio::test]
async fn same_pid_over_four_paths_surfaces_once() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();

    let alice = client(&overlay, &account, "alice", 3, true).await;
    assert_eq!(alice.subclient_indices(), vec![-1, 0, 1, 2]);

    let payload = Payload::binary(b"redundant".to_vec());
    let base = format!("alice.{}", account.public_key());
    for dest in [
        base.clone(),
        format!("__0__.{base}"),
        format!("__1__.{base}"),
        format!("__2__.{base}"),
    ] {
        let delivered = overlay
            .inject(
                &dest,
                Envelope {
                    src: "peer.key".to_string(),
                    payload: payload.clone(),
                    encrypted: false,
                    max_holding_secs: 0,
                },
            )
            .await;
        assert!(delivered, "all four paths must be registered");
    }

    let first = timeout(Duration::from_secs(1), alice.recv())
        .await
        .expect("first copy must surface")
        .unwrap();
    assert_eq!(first.data, b"redundant");
    assert_eq!(first.pid, payload.pid);

    let second = timeout(Duration::from_millis(150), alice.recv()).await;
    assert!(second.is_err(), "duplicates must be suppressed");
}

// ----------------------------------------------------------------------------
// Partial Construction
// ----------------------------------------------------------------------------

#[tokio::test]
async fn construction_tolerates_holes_and_skips_them() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();

    // Indices 0 and 2 fail, 1 succeeds; no original.
    overlay.refuse(&format!("__0__.carol.{}", account.public_key()));
    overlay.refuse(&format!("__2__.carol.{}", account.public_key()));

    let carol = client(&overlay, &account, "carol", 3, false).await;
    assert_eq!(carol.subclient_indices(), vec![1]);
    assert_eq!(carol.default_subclient(), 1);
    carol.wait_for_connect().await.unwrap();

    // A peer with a matching path index answers; the broadcast walks over
    // the holes without erroring.
    let dave = client(&overlay, &account, "dave", 2, true).await;
    {
        let dave = dave.clone();
        tokio::spawn(async move {
            let msg = dave.recv().await.unwrap();
            msg.reply(Some(b"still here")).await.unwrap();
        });
    }

    let dave_addr = dave.address().to_string();
    let response = timeout(
        Duration::from_secs(2),
        carol.send(&[&dave_addr], b"anyone?", true, 0),
    )
    .await
    .expect("send across holes must not hang")
    .unwrap();
    assert_eq!(response.data, b"still here");
}

#[tokio::test]
async fn construction_fails_when_every_subclient_fails() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();
    overlay.refuse(&format!("erin.{}", account.public_key()));
    overlay.refuse(&format!("__0__.erin.{}", account.public_key()));

    let result = MultiClient::new(
        Arc::new(overlay.clone()) as Arc<dyn OverlayNetwork>,
        &account,
        "erin",
        1,
        true,
        ClientConfig::testing(),
    )
    .await;
    assert!(matches!(result, Err(ClientError::Construction)));
}

// ----------------------------------------------------------------------------
// Close Semantics
// ----------------------------------------------------------------------------

#[tokio::test]
async fn close_is_idempotent_and_fails_further_operations() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();
    let alice = client(&overlay, &account, "alice", 1, true).await;
    let bob_addr = format!("bob.{}", account.public_key());

    alice.close().await.unwrap();
    alice.close().await.unwrap();
    assert!(alice.is_closed());

    assert!(matches!(
        alice.send(&[&bob_addr], b"late", true, 0).await,
        Err(ClientError::Closed)
    ));
    assert!(matches!(alice.recv().await, Err(ClientError::Closed)));
    assert!(matches!(alice.accept().await, Err(ClientError::Closed)));
    assert!(matches!(alice.dial(&bob_addr).await, Err(ClientError::Closed)));
}

#[tokio::test]
async fn close_deregisters_overlay_paths() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();
    let alice = client(&overlay, &account, "alice", 1, true).await;

    let original = format!("alice.{}", account.public_key());
    let tagged = format!("__0__.alice.{}", account.public_key());
    assert!(overlay.is_registered(&original));
    assert!(overlay.is_registered(&tagged));

    alice.close().await.unwrap();
    assert!(!overlay.is_registered(&original));
    assert!(!overlay.is_registered(&tagged));
}

#[tokio::test]
async fn debug_accept_after_close_hang() {
    let overlay = MemoryOverlay::new();
    let account = Account::random();
    let alice = client(&overlay, &account, "alice", 1, true).await;
    alice.close().await.unwrap();
    eprintln!("closed, calling accept");
    let r = tokio::time::timeout(std::time::Duration::from_secs(3), alice.accept()).await;
    eprintln!("accept result: {:?}", r.is_ok());
}
