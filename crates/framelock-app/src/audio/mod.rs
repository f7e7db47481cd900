pub mod mixer;
pub mod ports;
pub mod ring;

pub use mixer::{OutputMixer, OutputPort};
pub use ports::{PortConnection, plan_connections};
pub use ring::SampleRing;
