//! AirChat protocol core.
//! Host-driven: no I/O; host passes capture records, payloads and clock readings, and receives outputs.

pub mod command;
pub mod core;
pub mod dedup;
pub mod presence;
pub mod protocol;
pub mod reassembly;
pub mod wire;

pub use command::Command;
pub use self::core::{ChatCore, ChatEvent, Output, DEFAULT_PING_INTERVAL};
pub use dedup::SeenSet;
pub use presence::{PeerRecord, PresenceTracker, RosterEntry};
pub use protocol::{Event, Message, DEFAULT_PREAMBLE, MAX_NICK_LENGTH};
pub use reassembly::{CaptureRecord, Payload, Reassembler, ReassemblyError};
pub use wire::{decode, encode, DecodeError};
