//! Signed message envelopes and the router.
//!
//! Every datagram on the overlay is an [`Envelope`]: a signed, typed
//! payload with a per-origin sequence number. The [`Router`] enforces
//! signature validity, registry membership and replay suppression
//! before anything reaches the block factory.

use crate::block::Block;
use crate::canonical;
use crate::error::{ChainError, Result};
use crate::registry::ValidatorRegistry;
use crate::transaction::Transaction;
use crate::Signer;
use bytes::Bytes;
use diva_crypto::{PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum length of an envelope ident.
pub const MSG_IDENT_MAX_LEN: usize = 128;

/// Maximum relay hops for broadcast flooding.
pub const MAX_HOPS: usize = 8;

/// Typed message payloads exchanged between validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    /// Gossip a pending transaction.
    AddTx { transaction: Transaction },

    /// Block proposal from the computed proposer.
    Propose { block: Block },

    /// A validator's signature over a candidate block hash.
    #[serde(rename_all = "camelCase")]
    Sign {
        block_hash: String,
        signature: Signature,
    },

    /// A quorum-carrying block ready to commit.
    Confirm { block: Block },

    /// Request blocks in a height range.
    #[serde(rename_all = "camelCase")]
    Sync { from_height: u64, to_height: u64 },
}

impl Payload {
    /// Returns the payload type as a string for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::AddTx { .. } => "addTx",
            Payload::Propose { .. } => "propose",
            Payload::Sign { .. } => "sign",
            Payload::Confirm { .. } => "confirm",
            Payload::Sync { .. } => "sync",
        }
    }
}

/// A signed message envelope.
///
/// `dest` is a peer's base64url public key, or empty for broadcast.
/// The signature covers `ident ∥ seq ∥ origin ∥ dest ∥
/// canonical(data)`; the relay `path` is excluded because relayers
/// append themselves in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ident: String,
    pub seq: u64,
    pub origin: PublicKey,
    pub dest: String,
    pub sig: Signature,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PublicKey>,
    pub data: Payload,
}

impl Envelope {
    /// Builds and signs an envelope.
    pub fn build<S: Signer>(
        signer: &S,
        ident: String,
        seq: u64,
        dest: String,
        data: Payload,
    ) -> Result<Self> {
        validate_msg_ident(&ident)?;
        let origin = signer.public_key();
        let payload = canonical::envelope_signing_payload(&ident, seq, &origin, &dest, &data);
        let sig = signer.sign(payload.as_bytes());

        Ok(Self {
            ident,
            seq,
            origin,
            dest,
            sig,
            path: Vec::new(),
            data,
        })
    }

    /// Verifies the ident shape and the envelope signature.
    pub fn verify(&self) -> Result<()> {
        validate_msg_ident(&self.ident)?;
        let payload = canonical::envelope_signing_payload(
            &self.ident,
            self.seq,
            &self.origin,
            &self.dest,
            &self.data,
        );
        self.origin
            .verify(payload.as_bytes(), &self.sig)
            .map_err(|_| ChainError::InvalidMessage("envelope signature".into()))
    }

    /// True if this envelope is addressed to everyone.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.dest.is_empty()
    }

    /// Encodes the envelope for the wire.
    pub fn encode(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self)?;
        Ok(Bytes::from(json))
    }

    /// Decodes an envelope from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn validate_msg_ident(ident: &str) -> Result<()> {
    if ident.is_empty() || ident.len() > MSG_IDENT_MAX_LEN {
        return Err(ChainError::InvalidMessage(format!(
            "ident length {}",
            ident.len()
        )));
    }
    if !ident
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b',' || b == b'_' || b == b'-')
    {
        return Err(ChainError::InvalidMessage("ident charset".into()));
    }
    Ok(())
}

/// Inbound gatekeeper: signature, membership and replay checks.
#[derive(Debug, Default)]
pub struct Router {
    last_seq: HashMap<PublicKey, u64>,
}

impl Router {
    /// Creates a router with no replay history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates an inbound envelope and records its sequence number.
    ///
    /// Returns `true` if the payload is addressed to `local` (directly
    /// or by broadcast) and should be delivered; `false` for envelopes
    /// that are only in transit. Errors mean the envelope must be
    /// dropped and not relayed.
    ///
    /// Consensus payloads (Propose, Sign, Confirm) require the origin
    /// to be a registry member. Sync and AddTx are self-authenticated
    /// and also accepted from joining nodes that are not yet members.
    pub fn accept(
        &mut self,
        envelope: &Envelope,
        registry: &ValidatorRegistry,
        local: &PublicKey,
    ) -> Result<bool> {
        let member = registry.contains(&envelope.origin);
        if !member
            && !matches!(
                envelope.data,
                Payload::Sync { .. } | Payload::AddTx { .. }
            )
        {
            return Err(ChainError::NotInRegistry(envelope.origin.short_id()));
        }

        envelope.verify()?;

        let last = self.last_seq.get(&envelope.origin).copied().unwrap_or(0);
        if envelope.seq <= last {
            return Err(ChainError::Replay {
                origin: envelope.origin.short_id(),
                seq: envelope.seq,
                last,
            });
        }
        self.last_seq.insert(envelope.origin, envelope.seq);

        Ok(envelope.is_broadcast() || envelope.dest == local.to_b64())
    }

    /// Computes the relay fan-out for a broadcast envelope: every known
    /// peer except the origin, prior relayers and ourselves. Returns
    /// nothing once the hop bound is reached.
    #[must_use]
    pub fn relay_targets(
        envelope: &Envelope,
        registry: &ValidatorRegistry,
        local: &PublicKey,
    ) -> Vec<PublicKey> {
        if !envelope.is_broadcast() || envelope.path.len() >= MAX_HOPS {
            return Vec::new();
        }

        registry
            .keys()
            .into_iter()
            .filter(|pk| {
                pk != local && *pk != envelope.origin && !envelope.path.contains(pk)
            })
            .collect()
    }

    /// Forgets replay state for origins that left the registry.
    pub fn retain_members(&mut self, registry: &ValidatorRegistry) {
        self.last_seq.retain(|pk, _| registry.contains(pk));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis;
    use crate::test_support::keypair;

    fn setup() -> (ValidatorRegistry, Vec<diva_crypto::Keypair>) {
        let (genesis, keys) = genesis::generate_devnet(4);
        let mut registry = ValidatorRegistry::new();
        registry.apply_block(&genesis).unwrap();
        (registry, keys)
    }

    fn sync_envelope(key: &diva_crypto::Keypair, seq: u64) -> Envelope {
        Envelope::build(
            key,
            format!("m-{seq}"),
            seq,
            String::new(),
            Payload::Sync {
                from_height: 1,
                to_height: 2,
            },
        )
        .unwrap()
    }

    #[test]
    fn accept_then_replay_drop() {
        let (registry, keys) = setup();
        let mut router = Router::new();
        let local = keys[1].public_key();

        let env = sync_envelope(&keys[0], 1);
        assert!(router.accept(&env, &registry, &local).unwrap());

        // Same seq again: replay.
        assert!(matches!(
            router.accept(&env, &registry, &local),
            Err(ChainError::Replay { .. })
        ));

        // Lower seq after a higher one: reorder suppression.
        let newer = sync_envelope(&keys[0], 5);
        router.accept(&newer, &registry, &local).unwrap();
        let older = sync_envelope(&keys[0], 3);
        assert!(router.accept(&older, &registry, &local).is_err());
    }

    #[test]
    fn non_member_consensus_payload_rejected() {
        let (registry, keys) = setup();
        let mut router = Router::new();
        let outsider = keypair(99);

        let env = Envelope::build(
            &outsider,
            "s-1".into(),
            1,
            String::new(),
            Payload::Sign {
                block_hash: "h".into(),
                signature: outsider.sign(b"h"),
            },
        )
        .unwrap();

        assert!(matches!(
            router.accept(&env, &registry, &keys[0].public_key()),
            Err(ChainError::NotInRegistry(_))
        ));
    }

    #[test]
    fn non_member_sync_accepted_for_bootstrap() {
        let (registry, keys) = setup();
        let mut router = Router::new();
        let joiner = keypair(99);

        // A joining node may request blocks before it is registered;
        // its replays are still suppressed.
        let env = sync_envelope(&joiner, 1);
        assert!(router.accept(&env, &registry, &keys[0].public_key()).unwrap());
        assert!(router.accept(&env, &registry, &keys[0].public_key()).is_err());
    }

    #[test]
    fn tampered_envelope_rejected() {
        let (registry, keys) = setup();
        let mut router = Router::new();

        let mut env = sync_envelope(&keys[0], 1);
        env.seq = 2;
        assert!(router
            .accept(&env, &registry, &keys[1].public_key())
            .is_err());
    }

    #[test]
    fn directed_envelope_delivery() {
        let (registry, keys) = setup();
        let mut router = Router::new();
        let target = keys[1].public_key();

        let env = Envelope::build(
            &keys[0],
            "d-1".into(),
            1,
            target.to_b64(),
            Payload::Sync {
                from_height: 0,
                to_height: 0,
            },
        )
        .unwrap();

        assert!(router.accept(&env, &registry, &target).unwrap());

        let mut router2 = Router::new();
        let bystander = keys[2].public_key();
        assert!(!router2.accept(&env, &registry, &bystander).unwrap());
    }

    #[test]
    fn relay_skips_origin_path_and_self() {
        let (registry, keys) = setup();
        let local = keys[1].public_key();

        let mut env = sync_envelope(&keys[0], 1);
        env.path.push(keys[2].public_key());

        let targets = Router::relay_targets(&env, &registry, &local);
        assert_eq!(targets, vec![keys[3].public_key()]);

        // Signature is unaffected by the mutable path.
        assert!(env.verify().is_ok());
    }

    #[test]
    fn envelope_wire_roundtrip() {
        let keys = keypair(1);
        let env = sync_envelope(&keys, 1);
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);
        assert!(decoded.verify().is_ok());
    }
}
