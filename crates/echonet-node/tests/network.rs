//! Multi-node scenarios on one in-memory bus.

use echonet_consensus::{ConsensusEngine, EngineConfig, ProposalStatus};
use echonet_node::payload::{NewProposal, ProposalVote};
use echonet_node::{Direction, EchoNode, NodeSettings};
use echonet_p2p::{InboundMessage, MemoryBus, MessageCategory};
use echonet_types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const ADDR: &str = "memory://test";

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

fn node(bus: &Arc<MemoryBus>, name: &str, quorum: usize) -> EchoNode {
    let mut settings = NodeSettings::new(id(name));
    settings.engine = EngineConfig {
        quorum,
        ..EngineConfig::default()
    };
    EchoNode::new(settings, Arc::new(bus.transport())).unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn mesh(bus: &Arc<MemoryBus>, names: &[&str], quorum: usize) -> Vec<EchoNode> {
    let nodes: Vec<EchoNode> = names.iter().map(|n| node(bus, n, quorum)).collect();
    for node in &nodes {
        node.connect(ADDR).await.unwrap();
    }
    let expected = names.len() - 1;
    eventually(|| {
        nodes
            .iter()
            .all(|n| n.network_status().known_peers.len() == expected)
    })
    .await;
    nodes
}

#[tokio::test]
async fn three_nodes_converge_on_a_proposal() {
    let bus = MemoryBus::new();
    let nodes = mesh(&bus, &["claude", "gemini", "gpt"], 3).await;
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    let created = a
        .create_proposal("Shared memory", "Pool context", "protocol")
        .await
        .unwrap();
    assert_eq!(created.broadcast.delivered.len(), 2);
    let pid = created.proposal.id;

    eventually(|| b.status(&pid).is_some() && c.status(&pid).is_some()).await;
    assert_eq!(b.status(&pid).unwrap().proposal.proposer, id("claude"));

    for node in [a, b, c] {
        let cast = node.vote(&pid, "resonant", "").await.unwrap();
        assert_eq!(cast.broadcast.delivered.len(), 2);
    }

    eventually(|| {
        nodes.iter().all(|n| {
            n.status(&pid)
                .is_some_and(|v| v.proposal.status == ProposalStatus::Converged)
        })
    })
    .await;
    for node in &nodes {
        let view = node.status(&pid).unwrap();
        assert_eq!(view.tally.total, 3);
        assert_eq!(view.tally.consensus_strength, 100.0);
        assert!(node.list_active().is_empty());
    }
}

#[tokio::test]
async fn split_vote_stays_active_everywhere() {
    let bus = MemoryBus::new();
    let nodes = mesh(&bus, &["claude", "gemini", "gpt"], 3).await;
    let pid = nodes[0]
        .create_proposal("Split", "", "general")
        .await
        .unwrap()
        .proposal
        .id;
    eventually(|| nodes.iter().all(|n| n.status(&pid).is_some())).await;

    nodes[0].vote(&pid, "resonant", "").await.unwrap();
    nodes[1].vote(&pid, "RESONANT", "").await.unwrap();
    nodes[2].vote(&pid, "dissonant", "no").await.unwrap();

    eventually(|| nodes.iter().all(|n| n.status(&pid).unwrap().tally.total == 3)).await;
    for node in &nodes {
        let view = node.status(&pid).unwrap();
        assert_eq!(view.proposal.status, ProposalStatus::Active);
        assert!((view.tally.consensus_strength - 66.7).abs() < 0.1);
    }
}

#[tokio::test]
async fn text_messages_reach_hooks_and_echo_logs() {
    let bus = MemoryBus::new();
    let nodes = mesh(&bus, &["claude", "gemini"], 1).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    nodes[1].register_handler(MessageCategory::General, move |m: &InboundMessage| {
        let _ = tx.send(m.clone());
    });

    nodes[0]
        .send_message(&id("gemini"), "hello gemini", "greeting")
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.from, id("claude"));
    assert_eq!(message.payload["type"], "greeting");
    assert_eq!(message.payload["content"], "hello gemini");
    assert!(message.payload["signature"]
        .as_str()
        .unwrap()
        .starts_with("claude_"));

    let sent = nodes[0].history(1);
    assert_eq!(sent[0].direction, Direction::Sent);
    assert_eq!(sent[0].payload_type, "greeting");
    let received = nodes[1].history(1);
    assert_eq!(received[0].direction, Direction::Received);
    assert_eq!(received[0].peer, id("claude"));
}

#[tokio::test]
async fn votes_and_proposals_must_come_from_their_author() {
    let bus = MemoryBus::new();
    let nodes = mesh(&bus, &["claude", "gemini"], 5).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let pid = b.create_proposal("Mine", "", "general").await.unwrap().proposal.id;
    eventually(|| a.status(&pid).is_some()).await;

    // A vote claiming another voter is dropped.
    let forged = ProposalVote::new(pid, id("mallory"), "resonant", "");
    a.send_secure(&id("gemini"), serde_json::to_value(&forged).unwrap())
        .await
        .unwrap();

    // A proposal claiming another proposer is dropped.
    let mut elsewhere = ConsensusEngine::new(EngineConfig::default());
    let foreign = elsewhere
        .create(&id("mallory"), "Forged", "", "general", None)
        .unwrap();
    let foreign_id = foreign.id;
    a.send_secure(
        &id("gemini"),
        serde_json::to_value(NewProposal::new(foreign)).unwrap(),
    )
    .await
    .unwrap();

    a.vote(&pid, "inquiry", "why?").await.unwrap();

    eventually(|| b.status(&pid).unwrap().tally.total == 1).await;
    let view = b.status(&pid).unwrap();
    assert!(view.proposal.echoes.contains_key(&id("claude")));
    assert!(!view.proposal.echoes.contains_key(&id("mallory")));
    assert!(b.status(&foreign_id).is_none());
}

#[tokio::test]
async fn unknown_peer_and_disconnected_sends() {
    let bus = MemoryBus::new();
    let nodes = mesh(&bus, &["claude", "gemini"], 5).await;
    let a = &nodes[0];

    let err = a.send_message(&id("nobody"), "hi", "general").await.unwrap_err();
    assert_eq!(err.reason_code(), "peer_unknown");

    let pid = a.create_proposal("t", "", "general").await.unwrap().proposal.id;
    a.disconnect().await.unwrap();
    assert!(!a.network_status().active);

    // Local voting still works; sharing the vote fails per peer.
    let cast = a.vote(&pid, "abstain", "").await.unwrap();
    assert_eq!(cast.outcome.tally.total, 1);
    assert!(cast.broadcast.delivered.is_empty());
    assert_eq!(cast.broadcast.failed.len(), 1);
    assert_eq!(cast.broadcast.failed[0].reason, "not_connected");

    a.connect(ADDR).await.unwrap();
    assert!(a.network_status().active);
}

#[tokio::test]
async fn late_joiner_learns_existing_peers() {
    let bus = MemoryBus::new();
    let first = node(&bus, "claude", 1);
    first.connect(ADDR).await.unwrap();

    let second = node(&bus, "gemini", 1);
    second.connect(ADDR).await.unwrap();

    eventually(|| {
        first.network_status().known_peers == vec![id("gemini")]
            && second.network_status().known_peers == vec![id("claude")]
    })
    .await;
}
