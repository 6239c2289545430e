//! Simulated hardware and call network for running without real devices

mod hardware;
mod signaling;

pub use hardware::SimHardware;
pub use signaling::EchoSignaling;
