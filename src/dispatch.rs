//! Channel and subsystem admission policy.
//!
//! The SSH handler consults these functions for every channel-open and
//! subsystem request; only a "session" channel carrying an "sftp" subsystem
//! request ever reaches the SFTP engine.
//!
//! russh decodes the length-prefixed subsystem name with bounds checks
//! before the handler runs, so the gate only ever sees a decoded name.

/// The only channel type this server accepts
pub const SESSION_CHANNEL: &str = "session";

/// The only subsystem this server attaches
pub const SFTP_SUBSYSTEM: &str = "sftp";

/// Reason logged for rejected channel opens. russh answers the peer itself
/// with its own open-failure code.
pub const UNKNOWN_CHANNEL_TYPE: &str = "unknown channel type";

/// Answer to a channel-open or channel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

impl Verdict {
    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }
}

/// Decide whether a channel of `channel_type` may be opened
pub fn channel_verdict(channel_type: &str) -> Verdict {
    if channel_type == SESSION_CHANNEL {
        Verdict::Accept
    } else {
        Verdict::Reject
    }
}

/// Decide whether the subsystem `name` may be attached to a session channel
pub fn subsystem_verdict(name: &str) -> Verdict {
    if name == SFTP_SUBSYSTEM {
        Verdict::Accept
    } else {
        Verdict::Reject
    }
}
