//! The candidate's side of an in-process room.
//!
//! - `hub`: the rooms, one loopback transport each.
//! - `protocol`: JSON text messages exchanged alongside the audio.
//! - `session`: the socket lifecycle, bridging the socket and the room.

pub mod hub;
pub mod protocol;
pub mod session;

pub use hub::RoomHub;
pub use session::room_socket;
