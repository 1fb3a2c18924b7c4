//! Wallet identity tracking.
//!
//! The tracker turns raw wallet provider snapshots into the few transitions
//! the cart cares about. It never touches the cart itself; the engine acts
//! on the returned [`SessionTransition`].

use tracing::{debug, warn};

use crate::model::{SessionStatus, WalletAddress, WalletSession};

/// What the engine has to do after a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// Entered `connected`. The cart must be reloaded for `address`, and
    /// cleared first when `previous` is a different identity.
    Connected {
        previous: Option<WalletAddress>,
        address: WalletAddress,
    },
    /// Dropped to `disconnected`; the guest cart takes over.
    Disconnected { previous: Option<WalletAddress> },
    /// A different wallet is on its way in; the old cart must go now.
    Isolated { previous: WalletAddress },
    /// Nothing observable changed.
    Unchanged,
}

impl SessionTransition {
    /// Whether the transition moves the cart to another identity.
    pub fn switches_identity(&self) -> bool {
        match self {
            SessionTransition::Connected { previous, address } => previous.as_ref() != Some(address),
            SessionTransition::Disconnected { .. } | SessionTransition::Isolated { .. } => true,
            SessionTransition::Unchanged => false,
        }
    }
}

/// Tracks the current wallet session and the identity owning the loaded cart.
#[derive(Debug, Default)]
pub struct WalletSessionTracker {
    session: WalletSession,
    /// Address whose cart is currently loaded, `None` for the guest cart.
    owner: Option<WalletAddress>,
    /// Wallet on its way in after an isolation; the visible cart has no owner.
    pending: Option<WalletAddress>,
}

impl WalletSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &WalletSession {
        &self.session
    }

    /// Identity the visible cart belongs to; `None` is the guest cart.
    pub fn owner(&self) -> Option<&WalletAddress> {
        self.owner.as_ref()
    }

    /// Whether the cart is isolated while another wallet connects. The
    /// visible cart then belongs to neither the guest nor any wallet.
    pub fn is_isolated(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a new snapshot from the wallet provider.
    pub fn observe(&mut self, session: WalletSession) -> SessionTransition {
        let transition = match (session.status, session.address.as_ref()) {
            (SessionStatus::Connected, Some(address)) => {
                let same = self.session.status == SessionStatus::Connected
                    && self.owner.as_ref() == Some(address);
                if same {
                    SessionTransition::Unchanged
                } else {
                    self.pending = None;
                    let previous = self.owner.replace(address.clone());
                    SessionTransition::Connected {
                        previous,
                        address: address.clone(),
                    }
                }
            }
            (SessionStatus::Connected, None) => {
                warn!("wallet reported connected without an address, ignoring");
                return SessionTransition::Unchanged;
            }
            (SessionStatus::Disconnected, _) => {
                if self.session.status == SessionStatus::Disconnected {
                    SessionTransition::Unchanged
                } else {
                    self.pending = None;
                    SessionTransition::Disconnected {
                        previous: self.owner.take(),
                    }
                }
            }
            (SessionStatus::Connecting | SessionStatus::Reconnecting, incoming) => {
                match (&self.owner, incoming) {
                    (Some(owner), Some(incoming)) if owner != incoming => {
                        let previous = owner.clone();
                        self.owner = None;
                        self.pending = Some(incoming.clone());
                        SessionTransition::Isolated { previous }
                    }
                    _ => SessionTransition::Unchanged,
                }
            }
        };

        debug!(status = ?session.status, ?transition, "wallet session observed");
        self.session = session;
        transition
    }
}
