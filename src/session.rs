//! Session state: the phase state machine (spec §2/§4) and the per-tag
//! validity table that keeps messages from one phase leaking into another.
use uuid::Uuid;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// The four phases a session moves through, in order, with no way back
/// (spec §2). `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    Auth,
    Service,
    Closed,
}

impl Phase {
    /// Tags a peer is allowed to send while the session is in this phase.
    /// Anything else is a protocol violation (spec §4's per-phase tables).
    fn allowed_tags(self) -> &'static [u8] {
        match self {
            Phase::Handshake => &[1, 2],
            Phase::Auth => &[3, 4, 5],
            Phase::Service => &[6, 7, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21],
            Phase::Closed => &[],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Handshake => "HANDSHAKE",
            Phase::Auth => "AUTH",
            Phase::Service => "SERVICE",
            Phase::Closed => "CLOSED",
        }
    }
}

/// All per-session state that isn't "how to read/write the wire" (that
/// lives in [`crate::frame`] and [`crate::sender`]), "what to do with a
/// SERVICE-phase message" (that lives in [`crate::service`]), or the live
/// port-forward table (owned by a [`crate::service::forward::ForwardRegistry`]
/// shared with relay tasks, since those run concurrently with the receive
/// loop that owns this struct).
pub struct Session {
    pub id: Uuid,
    pub role: Role,
    pub phase: Phase,
    pub username: Option<String>,
    /// Sequence number expected on the next inbound record. Reset to 0 at
    /// the HANDSHAKE -> AUTH boundary along with the peer's outbound
    /// counter, since both sides discard the unauthenticated handshake
    /// sequence space once real keys are in place (spec §4.1, §9).
    recv_seq: u32,
    pub cwd: String,
}

impl Session {
    pub fn new(role: Role, cwd: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            phase: Phase::Handshake,
            username: None,
            recv_seq: 0,
            cwd: cwd.into(),
        }
    }

    pub fn validate_tag(&self, tag: u8) -> Result<()> {
        if self.phase.allowed_tags().contains(&tag) {
            Ok(())
        } else {
            Err(Error::Protocol {
                phase: self.phase.name(),
                detail: format!("tag {} is not valid in this phase", tag),
            })
        }
    }

    /// Checks and advances the expected inbound sequence number. Any
    /// number other than the exact next one is treated as a replay or
    /// reordering attempt and is fatal to the session (spec §4.1, §7).
    pub fn check_and_advance_recv_seq(&mut self, got: u32) -> Result<()> {
        if got != self.recv_seq {
            return Err(Error::Replay {
                expected: self.recv_seq,
                got,
            });
        }
        self.recv_seq = self.recv_seq.wrapping_add(1);
        Ok(())
    }

    /// Moves to the next phase and resets the inbound sequence counter,
    /// mirroring the sender task's own reset of its outbound counter.
    pub fn advance_phase(&mut self, next: Phase) {
        self.phase = next;
        self.recv_seq = 0;
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, Phase::Service) && self.username.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_phase_rejects_auth_tags() {
        let session = Session::new(Role::Server, "/");
        assert!(session.validate_tag(1).is_ok());
        assert!(session.validate_tag(3).is_err());
    }

    #[test]
    fn sequence_numbers_must_be_exact() {
        let mut session = Session::new(Role::Server, "/");
        assert!(session.check_and_advance_recv_seq(0).is_ok());
        assert!(session.check_and_advance_recv_seq(1).is_ok());
        assert!(session.check_and_advance_recv_seq(1).is_err());
        assert!(session.check_and_advance_recv_seq(5).is_err());
    }

    #[test]
    fn advancing_phase_resets_sequence() {
        let mut session = Session::new(Role::Server, "/");
        session.check_and_advance_recv_seq(0).unwrap();
        session.advance_phase(Phase::Auth);
        assert!(session.check_and_advance_recv_seq(0).is_ok());
    }
}
