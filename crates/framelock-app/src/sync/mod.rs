pub mod bridge;
pub mod player;
pub mod rate;
pub mod state;

pub use bridge::{BridgeMonitor, RendererRegistry, TransportBridge};
pub use player::{FrameProducer, Production, Renderer};
pub use rate::RateConverter;
pub use state::{RendererState, Status};
