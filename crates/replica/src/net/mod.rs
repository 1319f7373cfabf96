mod connection;
mod time;
mod wire;

pub use connection::{AbstractConnection, ClientConnection, ConnectionId};
pub use time::{NetworkFrame, NetworkTime};
pub use wire::{MAX_VLE_VALUE, WireReader, WireWriter};

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct NetworkId(pub u32);

impl NetworkId {
    pub const INVALID: NetworkId = NetworkId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn from_wire(raw: u32) -> Option<Self> {
        let id = Self(raw);
        id.is_valid().then_some(id)
    }

    pub fn to_wire(id: Option<Self>) -> u32 {
        id.unwrap_or(Self::INVALID).0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#invalid")
        }
    }
}
