//! Multi-validator consensus scenarios over an in-memory overlay.
//!
//! Each simulated node owns a router and a block factory; envelopes are
//! delivered synchronously over a full mesh, so a whole propose → sign
//! → confirm cycle runs deterministically inside a test.

use diva_chain::{
    genesis, Block, BlockFactory, Chain, Effect, Envelope, FactoryConfig, MemoryBlockStore, Op,
    Payload, Phase, Router,
};
use diva_crypto::Keypair;
use std::collections::VecDeque;

struct SimNode {
    factory: BlockFactory<MemoryBlockStore, Keypair>,
    router: Router,
    key: Keypair,
    seq: u64,
    committed: Vec<Block>,
}

impl SimNode {
    fn new(genesis_block: &Block, key: Keypair) -> Self {
        let chain = Chain::open(MemoryBlockStore::new(), genesis_block.clone()).unwrap();
        let factory = BlockFactory::new(chain, key.clone(), FactoryConfig::default());
        Self {
            factory,
            router: Router::new(),
            key,
            seq: 0,
            committed: Vec::new(),
        }
    }

    fn envelope(&mut self, dest: String, payload: Payload) -> Envelope {
        self.seq += 1;
        let ident = format!("{}-{}", self.key.public_key().short_id(), self.seq);
        Envelope::build(&self.key, ident, self.seq, dest, payload).unwrap()
    }
}

struct Sim {
    nodes: Vec<SimNode>,
    /// Indices excluded from delivery (simulated crash/partition).
    down: Vec<usize>,
}

impl Sim {
    fn new(n: usize) -> (Self, Vec<Keypair>) {
        let (genesis_block, keys) = genesis::generate_devnet(n);
        let nodes = keys
            .iter()
            .map(|k| SimNode::new(&genesis_block, k.clone()))
            .collect();
        (
            Self {
                nodes,
                down: Vec::new(),
            },
            keys,
        )
    }

    fn proposer_index(&self, height: u64, round: u32) -> usize {
        // Compute from a live node; a downed node's tip may be stale.
        let reference = (0..self.nodes.len())
            .find(|i| !self.down.contains(i))
            .unwrap();
        let proposer = self.nodes[reference]
            .factory
            .proposer_for(height, round)
            .unwrap();
        self.nodes
            .iter()
            .position(|n| n.key.public_key() == proposer)
            .unwrap()
    }

    /// Executes effects from `source`, delivering resulting envelopes
    /// until the network is quiescent.
    fn run_effects(&mut self, source: usize, effects: Vec<Effect>) {
        let mut queue: VecDeque<(usize, Envelope)> = VecDeque::new();
        self.enqueue(source, effects, &mut queue);

        while let Some((target, envelope)) = queue.pop_front() {
            if self.down.contains(&target) {
                continue;
            }

            let node = &mut self.nodes[target];
            let local = node.key.public_key();
            let deliver =
                match node
                    .router
                    .accept(&envelope, node.factory.chain().registry(), &local)
                {
                    Ok(deliver) => deliver,
                    Err(_) => continue,
                };
            if !deliver {
                continue;
            }

            let sender = envelope.origin;
            let effects = match envelope.data {
                Payload::AddTx { transaction } => node.factory.on_add_tx(transaction),
                Payload::Propose { block } => node.factory.on_propose(block, sender),
                Payload::Sign {
                    block_hash,
                    signature,
                } => node.factory.on_sign(block_hash, signature, sender),
                Payload::Confirm { block } => node.factory.on_confirm(block, sender),
                Payload::Sync {
                    from_height,
                    to_height,
                } => node.factory.on_sync(from_height, to_height, sender),
            };

            self.enqueue(target, effects, &mut queue);
        }
    }

    fn enqueue(
        &mut self,
        source: usize,
        effects: Vec<Effect>,
        queue: &mut VecDeque<(usize, Envelope)>,
    ) {
        for effect in effects {
            match effect {
                Effect::Broadcast(payload) => {
                    for target in 0..self.nodes.len() {
                        if target == source {
                            continue;
                        }
                        let envelope = self.nodes[source].envelope(String::new(), payload.clone());
                        queue.push_back((target, envelope));
                    }
                }
                Effect::Send(dest, payload) => {
                    if let Some(target) = self
                        .nodes
                        .iter()
                        .position(|n| n.key.public_key() == dest)
                    {
                        let envelope = self.nodes[source].envelope(dest.to_b64(), payload);
                        queue.push_back((target, envelope));
                    }
                }
                Effect::Committed(block) => {
                    self.nodes[source].committed.push(block);
                }
                Effect::ArmDeadline(_) | Effect::ClearDeadline => {}
            }
        }
    }

    /// One drain tick on every live node.
    fn tick(&mut self, now_ms: u64) {
        for i in 0..self.nodes.len() {
            if self.down.contains(&i) {
                continue;
            }
            let effects = self.nodes[i].factory.on_stack_ready(now_ms);
            self.run_effects(i, effects);
        }
    }

    /// Expires the phase deadline on every live node.
    fn expire_deadlines(&mut self) {
        for i in 0..self.nodes.len() {
            if self.down.contains(&i) {
                continue;
            }
            let effects = self.nodes[i].factory.on_deadline();
            self.run_effects(i, effects);
        }
    }

    fn tips(&self) -> Vec<(u64, String)> {
        self.nodes
            .iter()
            .map(|n| {
                let tip = n.factory.chain().tip();
                (tip.height, tip.hash.clone())
            })
            .collect()
    }
}

fn data_op(ns: &str) -> Op {
    Op::Data {
        ns: ns.into(),
        base64url: "YWJj".into(),
    }
}

#[test]
fn single_block_commit_converges_all_tips() {
    let (mut sim, _keys) = Sim::new(5);
    let proposer = sim.proposer_index(1, 0);

    // Submit a command to the proposer and run one cycle.
    let (_, effects) = sim.nodes[proposer]
        .factory
        .stack(None, vec![data_op("t")], 1_000)
        .unwrap();
    sim.run_effects(proposer, effects);
    sim.tick(2_000);

    let tips = sim.tips();
    assert!(tips.iter().all(|(h, _)| *h == 1), "tips: {tips:?}");
    let first = &tips[0].1;
    assert!(tips.iter().all(|(_, hash)| hash == first));

    // The committed block carries the quorum.
    let block = sim.nodes[proposer].committed[0].clone();
    assert!(block.votes.len() >= 4); // ⌈2/3·50⌉ = 34 of 50 ⇒ ≥ 4 signers
    assert_eq!(block.tx.len(), 1);
}

#[test]
fn registry_replay_is_deterministic() {
    let (mut sim, keys) = Sim::new(5);
    let proposer = sim.proposer_index(1, 0);

    let (_, effects) = sim.nodes[proposer]
        .factory
        .stack(
            None,
            vec![Op::ModifyStake {
                public_key: keys[0].public_key(),
                stake: 25,
            }],
            1_000,
        )
        .unwrap();
    sim.run_effects(proposer, effects);
    sim.tick(2_000);

    let registries: Vec<_> = sim
        .nodes
        .iter()
        .map(|n| n.factory.chain().registry().clone())
        .collect();

    for registry in &registries[1..] {
        assert_eq!(registry, &registries[0]);
    }
    assert_eq!(registries[0].stake_of(&keys[0].public_key()), 25);
}

#[test]
fn proposer_failure_falls_through_to_second_closest() {
    let (mut sim, _keys) = Sim::new(5);
    let dead = sim.proposer_index(1, 0);
    let second = sim.proposer_index(1, 1);
    assert_ne!(dead, second);

    sim.down.push(dead);

    // Every live node needs pending work to drive the cycle.
    for i in 0..5 {
        if i == dead {
            continue;
        }
        let (_, effects) = sim.nodes[i]
            .factory
            .stack(None, vec![data_op(&format!("n{i}"))], 1_000)
            .unwrap();
        sim.run_effects(i, effects);
    }

    // Round 0: the computed proposer is down, nothing happens.
    sim.tick(2_000);
    assert!(sim.nodes.iter().all(|n| n.factory.chain().height() == 0));

    // Deadline expires, round 1: the second-closest proposes and the
    // four remaining validators reach quorum (40 of 50 ≥ 34).
    sim.expire_deadlines();
    sim.tick(3_000);

    for (i, node) in sim.nodes.iter().enumerate() {
        if i == dead {
            continue;
        }
        assert_eq!(node.factory.chain().height(), 1, "node {i}");
        assert_eq!(node.factory.chain().tip().origin, sim.nodes[second].key.public_key());
    }
}

#[test]
fn adversarial_vote_is_rejected_at_the_router() {
    let (mut sim, _keys) = Sim::new(5);
    let proposer = sim.proposer_index(1, 0);

    let (_, effects) = sim.nodes[proposer]
        .factory
        .stack(None, vec![data_op("t")], 1_000)
        .unwrap();
    sim.run_effects(proposer, effects);

    // Propose without delivering the votes back.
    let effects = sim.nodes[proposer].factory.on_stack_ready(2_000);
    let candidate_hash = match &effects[0] {
        Effect::Broadcast(Payload::Propose { block }) => block.hash.clone(),
        other => panic!("expected propose, got {other:?}"),
    };

    // An envelope signed by a key outside the registry is dropped.
    let outsider = Keypair::from_secret_bytes(&[200u8; 32]).unwrap();
    let forged = Envelope::build(
        &outsider,
        "forged-1".into(),
        1,
        String::new(),
        Payload::Sign {
            block_hash: candidate_hash.clone(),
            signature: outsider.sign(candidate_hash.as_bytes()),
        },
    )
    .unwrap();

    let node = &mut sim.nodes[proposer];
    let local = node.key.public_key();
    assert!(node
        .router
        .accept(&forged, node.factory.chain().registry(), &local)
        .is_err());

    // Without quorum, nothing commits.
    assert_eq!(node.factory.chain().height(), 0);
    assert_eq!(node.factory.phase(), Phase::Signing);
}

#[test]
fn replayed_propose_does_not_trigger_second_sign() {
    let (mut sim, _keys) = Sim::new(5);
    let proposer = sim.proposer_index(1, 0);
    let observer = (proposer + 1) % 5;

    let (_, effects) = sim.nodes[proposer]
        .factory
        .stack(None, vec![data_op("t")], 1_000)
        .unwrap();
    sim.run_effects(proposer, effects);

    let effects = sim.nodes[proposer].factory.on_stack_ready(2_000);
    let payload = match &effects[0] {
        Effect::Broadcast(payload @ Payload::Propose { .. }) => payload.clone(),
        other => panic!("expected propose, got {other:?}"),
    };

    let envelope = sim.nodes[proposer].envelope(String::new(), payload);

    // First delivery: accepted, the observer answers with a Sign.
    let node = &mut sim.nodes[observer];
    let local = node.key.public_key();
    assert!(node
        .router
        .accept(&envelope, node.factory.chain().registry(), &local)
        .unwrap());
    let Payload::Propose { block } = envelope.data.clone() else {
        unreachable!()
    };
    let first = node.factory.on_propose(block, envelope.origin);
    assert!(matches!(first[0], Effect::Broadcast(Payload::Sign { .. })));

    // Replay of the identical envelope: seq ≤ lastSeq, dropped before
    // it ever reaches the factory.
    assert!(node
        .router
        .accept(&envelope, node.factory.chain().registry(), &local)
        .is_err());
}

#[test]
fn late_node_syncs_through_confirm_pages() {
    let (mut sim, _keys) = Sim::new(5);

    // Commit two blocks with node `late` offline.
    let late = {
        // Pick a node that is not the proposer of the first two heights.
        let p1 = sim.proposer_index(1, 0);
        (0..5).find(|i| *i != p1).unwrap()
    };
    sim.down.push(late);

    for height in 1..=2u64 {
        let proposer = sim.proposer_index(height, 0);
        if proposer == late {
            // The dead node cannot propose; skip via round fallback.
            sim.expire_deadlines();
        }
        let live_proposer = if proposer == late {
            sim.proposer_index(height, 1)
        } else {
            proposer
        };
        let (_, effects) = sim.nodes[live_proposer]
            .factory
            .stack(None, vec![data_op(&format!("h{height}"))], 1_000 * height)
            .unwrap();
        sim.run_effects(live_proposer, effects);
        sim.tick(2_000 * height);
    }

    let reference = sim
        .nodes
        .iter()
        .enumerate()
        .find(|(i, _)| !sim.down.contains(i))
        .map(|(_, n)| n.factory.chain().tip().hash.clone())
        .unwrap();

    // Heal the partition: the late node requests the missing range.
    sim.down.clear();
    let target = sim.nodes[late].key.public_key();
    let peer = (0..5).find(|i| *i != late).unwrap();

    let sync = sim.nodes[late].envelope(
        String::new(),
        Payload::Sync {
            from_height: 1,
            to_height: 2,
        },
    );
    // Deliver the request to one peer; its Confirm pages flow back.
    let node = &mut sim.nodes[peer];
    let local = node.key.public_key();
    node.router
        .accept(&sync, node.factory.chain().registry(), &local)
        .unwrap();
    let effects = node.factory.on_sync(1, 2, target);
    sim.run_effects(peer, effects);

    assert_eq!(sim.nodes[late].factory.chain().height(), 2);
    assert_eq!(sim.nodes[late].factory.chain().tip().hash, reference);
}
