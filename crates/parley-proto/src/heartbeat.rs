//! STOMP heart-beat header and negotiation.

use std::{fmt, time::Duration};

use crate::errors::{ProtocolError, Result};

/// Value of a `heart-beat` header: `outgoing,incoming` in milliseconds.
///
/// `outgoing` is the smallest interval at which the sender can emit
/// heart-beats; `incoming` is the interval at which it wants to receive them.
/// Zero means "cannot" / "does not want".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Sender's outgoing capability (ms).
    pub outgoing_ms: u64,
    /// Sender's desired incoming interval (ms).
    pub incoming_ms: u64,
}

impl HeartBeat {
    /// Heart-beating disabled in both directions.
    pub const DISABLED: Self = Self { outgoing_ms: 0, incoming_ms: 0 };

    /// Build from durations, truncated to milliseconds.
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing_ms: outgoing.as_millis() as u64, incoming_ms: incoming.as_millis() as u64 }
    }

    /// Parse `"cx,cy"`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidHeader` if the value is not two integers
    pub fn parse(value: &str) -> Result<Self> {
        let invalid =
            || ProtocolError::InvalidHeader { header: "heart-beat", value: value.to_string() };

        let (out, inc) = value.split_once(',').ok_or_else(invalid)?;
        let outgoing_ms = out.trim().parse().map_err(|_| invalid())?;
        let incoming_ms = inc.trim().parse().map_err(|_| invalid())?;
        Ok(Self { outgoing_ms, incoming_ms })
    }

    /// Negotiate with the server's answer.
    ///
    /// `self` is what the client offered in CONNECT, `server` is the header
    /// from CONNECTED.
    pub fn negotiate(self, server: Self) -> Negotiated {
        let pick = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };

        Negotiated {
            outgoing: pick(self.outgoing_ms, server.incoming_ms),
            incoming: pick(self.incoming_ms, server.outgoing_ms),
        }
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// Effective heart-beat intervals after negotiation. `None` means disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// How often the client must send something.
    pub outgoing: Option<Duration>,
    /// How often the client should expect to hear something.
    pub incoming: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let hb = HeartBeat::parse("10000, 5000").unwrap();
        assert_eq!(hb, HeartBeat { outgoing_ms: 10_000, incoming_ms: 5_000 });
        assert_eq!(hb.to_string(), "10000,5000");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(HeartBeat::parse("10000").is_err());
        assert!(HeartBeat::parse("a,b").is_err());
    }

    #[test]
    fn negotiation_takes_larger_interval() {
        let client = HeartBeat::new(Duration::from_secs(10), Duration::from_secs(10));
        let server = HeartBeat { outgoing_ms: 20_000, incoming_ms: 5_000 };

        let negotiated = client.negotiate(server);
        assert_eq!(negotiated.outgoing, Some(Duration::from_secs(10)));
        assert_eq!(negotiated.incoming, Some(Duration::from_secs(20)));
    }

    #[test]
    fn zero_on_either_side_disables() {
        let client = HeartBeat::new(Duration::from_secs(10), Duration::ZERO);
        let server = HeartBeat { outgoing_ms: 20_000, incoming_ms: 0 };

        assert_eq!(client.negotiate(server), Negotiated::default());
    }
}
