//! Peer discovery (C9) and peer transfer (C10): UDP multicast presence
//! beacons and a TCP code-snippet drop channel between sessions on the
//! same local network.
//!
//! Grounded on `discover_worker.py`/`code_drop_server.py`/`code_drop_client.py`.
//! Non-goals (spec): authenticated or encrypted peer transport — these are
//! plain local-network conveniences, not a trust boundary.

pub mod discovery;
pub mod transfer;

pub use discovery::{PeerDirectory, PeerRecord};
pub use transfer::{CodeMessage, TransferClient, TransferServer};
