//! Relay-to-relay links: large forwarded envelopes and entry peers that come
//! and go.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tether_types::envelope::Envelope;
use tether_wire::codec::{encode_envelope, MAX_FRAME_SIZE};
use tether_wire::{NodeClient, RelayNode};

async fn next(client: &NodeClient) -> Envelope {
    tokio::time::timeout(Duration::from_secs(10), client.receive())
        .await
        .expect("no envelope within 10s")
        .expect("receive failed")
}

async fn wait_known(relay: &RelayNode, agent: &Arc<NodeClient>) {
    let address = agent.identity().address();
    wait_for("agent to propagate", || {
        relay.registry().find_peer_for(&address).is_some()
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_envelopes_do_not_break_peer_link() {
    let relay_a = start_relay("big-a", Vec::new()).await;
    let relay_b = start_relay("big-b", vec![relay_a.local_addr()]).await;
    let alice = client(&relay_a);
    let bob = client(&relay_b);
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();
    wait_known(&relay_a, &bob).await;

    let big = envelope(&alice, &bob, &vec![7u8; 13 * 1024 * 1024]);
    alice.send(&big).await.unwrap();
    assert_eq!(next(&bob).await, big);

    // Fits a client frame exactly, so the one-byte peer header pushes it over.
    let overhead = encode_envelope(&envelope(&alice, &bob, b"")).len();
    let at_limit = envelope(&alice, &bob, &vec![1u8; MAX_FRAME_SIZE as usize - overhead]);
    alice.send(&at_limit).await.unwrap();

    let small = envelope(&alice, &bob, b"after the big ones");
    alice.send(&small).await.unwrap();
    assert_eq!(next(&bob).await, small);
    assert_eq!(relay_a.registry().connected_count(), 1);
    assert_eq!(relay_b.registry().connected_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_entry_peer_redialled_after_restart() {
    let mut config_a = relay_config("restart-a", Vec::new());
    config_a.private_key_hex = Some("44".repeat(32));
    let (relay_a, accept_a) = RelayNode::start(config_a.clone()).await.unwrap();
    let relay_b = start_relay("restart-b", vec![relay_a.local_addr()]).await;

    let bob = client(&relay_b);
    let alice = client(&relay_a);
    bob.connect().await.unwrap();
    alice.connect().await.unwrap();
    wait_known(&relay_b, &alice).await;

    let before = envelope(&bob, &alice, b"before restart");
    bob.send(&before).await.unwrap();
    assert_eq!(next(&alice).await, before);

    alice.disconnect().await;
    relay_a.shutdown();
    accept_a.await.unwrap();
    wait_for("b to see the link drop", || {
        relay_b.registry().connected_count() == 0
    })
    .await;

    config_a.listen_addr = relay_a.local_addr();
    let (relay_a, _accept) = RelayNode::start(config_a).await.unwrap();
    wait_for("b to redial a", || relay_b.registry().connected_count() == 1).await;

    let alice = client(&relay_a);
    alice.connect().await.unwrap();
    wait_known(&relay_b, &alice).await;
    wait_known(&relay_a, &bob).await;

    let after = envelope(&bob, &alice, b"after restart");
    bob.send(&after).await.unwrap();
    assert_eq!(next(&alice).await, after);

    let reply = envelope(&alice, &bob, b"and back");
    alice.send(&reply).await.unwrap();
    assert_eq!(next(&bob).await, reply);

    relay_a.shutdown();
    relay_b.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_entry_peer_down_at_start_is_peered_later() {
    let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr_a = spare.local_addr().unwrap();
    drop(spare);

    let relay_b = start_relay("early-b", vec![addr_a]).await;
    assert_eq!(relay_b.registry().connected_count(), 0);

    let mut config_a = relay_config("late-a", Vec::new());
    config_a.listen_addr = addr_a;
    let (relay_a, _accept) = RelayNode::start(config_a).await.unwrap();
    wait_for("b to reach a", || relay_b.registry().connected_count() == 1).await;
    wait_for("a to see b", || relay_a.registry().connected_count() == 1).await;

    relay_a.shutdown();
    relay_b.shutdown();
}
