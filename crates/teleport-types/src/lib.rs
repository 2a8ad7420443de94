//! Shared data model for the cross-chain teleport subsystem.
//!
//! Every component crate depends on these definitions: identifiers, assets,
//! intents, transfer and settlement records, session views, block operations,
//! the capability traits implemented by external collaborators and the
//! event bus.

pub mod asset;
pub mod block;
pub mod capabilities;
pub mod events;
pub mod ids;
pub mod intent;
pub mod serde_helpers;
pub mod session;
pub mod settlement;
pub mod transfer;

pub use asset::*;
pub use block::*;
pub use capabilities::*;
pub use events::*;
pub use ids::*;
pub use intent::*;
pub use session::*;
pub use settlement::*;
pub use transfer::*;
