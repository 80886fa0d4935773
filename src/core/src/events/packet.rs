use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session_management::session::SessionId;

/// A packet loaned to a handler for the duration of one call.
///
/// The payload borrow cannot outlive the hook invocation; call
/// [`Packet::to_owned_packet`] to keep the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    session_id: SessionId,
    opcode: u32,
    payload: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn new(session_id: SessionId, opcode: u32, payload: &'a [u8]) -> Self {
        Self {
            session_id,
            opcode,
            payload,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn to_owned_packet(&self) -> OwnedPacket {
        OwnedPacket::new(self.session_id, self.opcode, self.payload.to_vec())
    }
}

impl fmt::Display for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet[session_id: {}, opcode: {}, len: {}]",
            self.session_id,
            self.opcode,
            self.payload.len()
        )
    }
}

/// Engine-side packet buffer. The dispatcher lends it out as a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedPacket {
    session_id: SessionId,
    opcode: u32,
    payload: Vec<u8>,
}

impl OwnedPacket {
    pub fn new(session_id: SessionId, opcode: u32, payload: Vec<u8>) -> Self {
        Self {
            session_id,
            opcode,
            payload,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn as_packet(&self) -> Packet<'_> {
        Packet::new(self.session_id, self.opcode, &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_outlives_the_loan() {
        let kept = {
            let buffer = vec![1u8, 2, 3];
            let loan = Packet::new(SessionId::new(2), 17, &buffer);
            loan.to_owned_packet()
        };

        assert_eq!(kept.payload(), &[1, 2, 3]);
        assert_eq!(kept.opcode(), 17);
        assert_eq!(kept.as_packet().len(), 3);
    }
}
