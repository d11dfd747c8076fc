pub mod bus;
pub mod chunker;
pub mod nats;

pub use bus::{publish_chunked, BusSubscription, InboundMessage, MemoryBus, MessageBus};
pub use chunker::{split, MicMessage, END_MARKER};
pub use nats::NatsBus;
