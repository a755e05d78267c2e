pub mod broker;
pub mod policy;
pub mod protocol;
pub mod session;

pub use broker::{BrokerConfig, EditEvent, EditOutcome, SyncBroker};
pub use policy::{FanOut, LastWriteWins, ResolutionPolicy};
pub use protocol::{ClientMessage, ServerMessage};
pub use session::{ConnectionId, Outbox, Session, SessionRegistry};

// Real-time sync core: the session registry tracks who is connected and
// what they have open; the broker rewrites documents and fans the result
// out through each session's outbound queue.
