//! The core executor.
//!
//! One task owns every piece of consensus state: the factory (chain,
//! pools, credit), the router and the envelope sequence counter.
//! Network and API input arrive over channels, timers fire in the same
//! `select!`, and the factory's effects are carried out right here, so
//! no locking ever guards a state transition.

use crate::bootstrap::{Action, Bootstrap};
use crate::config::Config;
use crate::state::{ApiCommand, NetworkPeer, NodeState, VoteSet};
use crate::transport::{NetworkOut, PeerTable};
use crate::wallet::Wallet;
use diva_chain::{Block, BlockFactory, Effect, Envelope, Op, Payload, Router};
use diva_crypto::PublicKey;
use diva_store::RocksDbBlockStore;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

/// Wall-clock milliseconds since the unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// The single-task consensus executor.
pub struct Core {
    factory: BlockFactory<RocksDbBlockStore, Wallet>,
    router: Router,
    wallet: Wallet,
    config: Config,
    out: NetworkOut,
    peers: Arc<PeerTable>,
    state: Arc<NodeState>,
    feed: broadcast::Sender<Block>,
    bootstrap: Bootstrap,
    seq: u64,
    tick: u64,
    deadline: Option<Instant>,
}

impl Core {
    /// Assembles the executor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: BlockFactory<RocksDbBlockStore, Wallet>,
        wallet: Wallet,
        config: Config,
        out: NetworkOut,
        peers: Arc<PeerTable>,
        state: Arc<NodeState>,
        feed: broadcast::Sender<Block>,
    ) -> Self {
        let bootstrap = Bootstrap::new(config.bootstrap);

        Self {
            factory,
            router: Router::new(),
            wallet,
            config,
            out,
            peers,
            state,
            feed,
            bootstrap,
            // Sequence numbers must outlive restarts for peers' replay
            // suppression; wall-clock milliseconds are monotonic enough.
            seq: now_ms(),
            tick: 0,
            deadline: None,
        }
    }

    /// Runs until shutdown is signalled.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Envelope>,
        mut api: mpsc::Receiver<ApiCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut drain = interval(Duration::from_millis(self.config.network_p2p_interval_ms));
        drain.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut credit = interval(Duration::from_millis(self.config.scaled_interval_ms()));
        credit.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut morph = interval(Duration::from_millis(self.config.network_morph_interval_ms));
        morph.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.refresh_state();
        tracing::info!(
            public_key = %self.wallet.public_key(),
            height = self.factory.chain().height(),
            member = self.factory.is_member(),
            "core executor started"
        );

        loop {
            let deadline_at = self
                .deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3_600));

            tokio::select! {
                Some(envelope) = inbound.recv() => {
                    self.handle_envelope(envelope).await;
                }

                Some(command) = api.recv() => {
                    self.handle_api(command).await;
                }

                _ = drain.tick() => {
                    let effects = self.factory.on_stack_ready(now_ms());
                    self.execute(effects).await;
                }

                _ = credit.tick() => {
                    let effects = self.factory.on_credit_window(now_ms());
                    self.execute(effects).await;
                }

                _ = morph.tick() => {
                    self.on_morph().await;
                }

                _ = sleep_until(deadline_at), if self.deadline.is_some() => {
                    self.deadline = None;
                    let effects = self.factory.on_deadline();
                    self.execute(effects).await;
                }

                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("core executor stopped");
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let local = self.wallet.public_key();

        let deliver = match self
            .router
            .accept(&envelope, self.factory.chain().registry(), &local)
        {
            Ok(deliver) => deliver,
            Err(e) => {
                tracing::debug!(kind = envelope.data.kind(), error = %e, "envelope dropped");
                return;
            }
        };

        // Bounded-hop flood: pass broadcasts on to peers that have not
        // seen them yet.
        let targets =
            Router::relay_targets(&envelope, self.factory.chain().registry(), &local);
        if !targets.is_empty() {
            let mut relay = envelope.clone();
            relay.path.push(local);
            if let Ok(bytes) = relay.encode() {
                let addrs: Vec<SocketAddr> =
                    targets.iter().filter_map(|pk| self.addr_of(pk)).collect();
                for addr in addrs {
                    self.out.send(addr, &bytes).await;
                }
            }
        }

        if !deliver {
            return;
        }

        let sender = envelope.origin;
        let effects = match envelope.data {
            Payload::AddTx { transaction } => self.factory.on_add_tx(transaction),
            Payload::Propose { block } => self.factory.on_propose(block, sender),
            Payload::Sign {
                block_hash,
                signature,
            } => self.factory.on_sign(block_hash, signature, sender),
            Payload::Confirm { block } => self.factory.on_confirm(block, sender),
            Payload::Sync {
                from_height,
                to_height,
            } => self.factory.on_sync(from_height, to_height, sender),
        };
        self.execute(effects).await;
    }

    async fn handle_api(&mut self, command: ApiCommand) {
        match command {
            ApiCommand::Stack { commands, resp } => {
                let ops: Vec<Op> = commands.into_iter().map(|c| c.op).collect();
                match self.factory.stack(None, ops, now_ms()) {
                    Ok((ident, effects)) => {
                        let _ = resp.send(Ok(ident));
                        self.execute(effects).await;
                    }
                    Err(e) => {
                        let _ = resp.send(Err(e));
                    }
                }
            }
            ApiCommand::GetBlock { height, resp } => {
                let block = self.factory.chain().get(height).ok().flatten();
                let _ = resp.send(block);
            }
            ApiCommand::Range {
                gte,
                lte,
                limit,
                resp,
            } => {
                let blocks = self
                    .factory
                    .chain()
                    .range(gte, lte, limit)
                    .unwrap_or_default();
                let _ = resp.send(blocks);
            }
        }
    }

    async fn on_morph(&mut self) {
        self.tick += 1;
        let action = self.bootstrap.step(
            self.factory.is_member(),
            self.factory.chain().height(),
            self.tick,
        );

        match action {
            Action::Sync { from, to } => {
                tracing::info!(from, to, "bootstrap sync");
                let peers = self.member_keys();
                for peer in peers {
                    self.send_to(
                        peer,
                        Payload::Sync {
                            from_height: from,
                            to_height: to,
                        },
                    )
                    .await;
                }
            }
            Action::Register => {
                tracing::info!("bootstrap self-registration");
                let op = Op::AddPeer {
                    host: self.config.ip.clone(),
                    port: self.config.port,
                    public_key: self.wallet.public_key(),
                };
                match self.factory.stack(None, vec![op], now_ms()) {
                    Ok((_, effects)) => self.execute(effects).await,
                    Err(e) => tracing::debug!(error = %e, "registration already pending"),
                }
            }
            Action::Wait => {}
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Broadcast(payload) => self.broadcast(payload).await,
                Effect::Send(dest, payload) => self.send_to(dest, payload).await,
                Effect::Committed(block) => {
                    let _ = self.feed.send(block);
                }
                Effect::ArmDeadline(after) => {
                    self.deadline = Some(Instant::now() + after);
                }
                Effect::ClearDeadline => {
                    self.deadline = None;
                }
            }
        }
        self.refresh_state();
    }

    async fn broadcast(&mut self, payload: Payload) {
        let envelope = match self.next_envelope(String::new(), payload) {
            Some(envelope) => envelope,
            None => return,
        };
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "envelope encoding failed");
                return;
            }
        };

        let addrs: Vec<SocketAddr> = self
            .member_keys()
            .iter()
            .filter_map(|pk| self.addr_of(pk))
            .collect();
        for addr in addrs {
            self.out.send(addr, &bytes).await;
        }
    }

    async fn send_to(&mut self, dest: PublicKey, payload: Payload) {
        let envelope = match self.next_envelope(dest.to_b64(), payload) {
            Some(envelope) => envelope,
            None => return,
        };
        let Some(addr) = self.addr_of(&dest) else {
            tracing::debug!(dest = %dest.short_id(), "no address for peer");
            return;
        };
        match envelope.encode() {
            Ok(bytes) => self.out.send(addr, &bytes).await,
            Err(e) => tracing::warn!(error = %e, "envelope encoding failed"),
        }
    }

    fn next_envelope(&mut self, dest: String, payload: Payload) -> Option<Envelope> {
        self.seq += 1;
        let ident = format!("{}-{}", self.wallet.public_key().short_id(), self.seq);
        match Envelope::build(&self.wallet, ident, self.seq, dest, payload) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!(error = %e, "envelope build failed");
                None
            }
        }
    }

    /// Registry members other than the local node.
    fn member_keys(&self) -> Vec<PublicKey> {
        let local = self.wallet.public_key();
        self.factory
            .chain()
            .registry()
            .keys()
            .into_iter()
            .filter(|pk| *pk != local)
            .collect()
    }

    /// Resolves a peer address: the registry endpoint first, then the
    /// transport's observed address (covers joining nodes).
    fn addr_of(&self, pk: &PublicKey) -> Option<SocketAddr> {
        if let Some(peer) = self.factory.chain().registry().peer(pk) {
            if let Some(addr) = resolve(&peer.host, peer.port) {
                return Some(addr);
            }
        }
        self.peers.get(&pk.to_b64()).map(|p| p.address)
    }

    fn refresh_state(&self) {
        let chain = self.factory.chain();
        let network: Vec<NetworkPeer> = chain
            .registry()
            .iter()
            .map(|(pk, peer)| NetworkPeer {
                public_key: *pk,
                host: peer.host.clone(),
                port: peer.port,
                stake: peer.stake,
            })
            .collect();
        let votes: Vec<VoteSet> = self
            .factory
            .votes_snapshot()
            .into_iter()
            .map(|(block_hash, votes)| VoteSet { block_hash, votes })
            .collect();

        self.state.refresh(
            chain.tip().clone(),
            self.factory.phase(),
            network,
            self.factory.pool_snapshot(),
            votes,
        );
    }
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    (host, port).to_socket_addrs().ok()?.next()
}
