//! Startup synchronization and self-registration.
//!
//! A node outside the registry first catches up with its peers via
//! ranged sync requests, then stacks an `addPeer` for itself and waits
//! for inclusion in a committed block. Until then it listens but does
//! not propose (the factory refuses to act for non-members).

use diva_chain::SYNC_PAGE;

/// What the core executor should do on this bootstrap tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Request blocks `from..=to` from known peers.
    Sync { from: u64, to: u64 },

    /// Stack the local `addPeer` registration.
    Register,

    /// Nothing to do (done, disabled, or awaiting inclusion).
    Wait,
}

/// Bootstrap progress tracking, driven by the morph-interval tick.
#[derive(Debug)]
pub struct Bootstrap {
    enabled: bool,
    last_height: Option<u64>,
    registered_at: Option<u64>,
}

/// Ticks to wait for inclusion before re-stacking the registration.
const REGISTER_RETRY_TICKS: u64 = 10;

impl Bootstrap {
    /// Creates the tracker; `enabled` mirrors the `bootstrap` config
    /// flag.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_height: None,
            registered_at: None,
        }
    }

    /// Decides the next action from the current membership and tip
    /// height. Syncing continues while the tip advances; once it
    /// stalls, the node registers itself.
    pub fn step(&mut self, is_member: bool, height: u64, tick: u64) -> Action {
        if !self.enabled || is_member {
            return Action::Wait;
        }

        match self.last_height {
            Some(prev) if prev == height => match self.registered_at {
                None => {
                    self.registered_at = Some(tick);
                    Action::Register
                }
                Some(at) if tick.saturating_sub(at) >= REGISTER_RETRY_TICKS => {
                    self.registered_at = Some(tick);
                    Action::Register
                }
                Some(_) => Action::Wait,
            },
            _ => {
                self.last_height = Some(height);
                Action::Sync {
                    from: height + 1,
                    to: height + SYNC_PAGE as u64,
                }
            }
        }
    }
}
