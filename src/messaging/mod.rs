pub mod broadcast;
pub mod mqtt;
#[cfg(test)]
mod tests;

pub use broadcast::{Broadcaster, OutboundEvent};
pub use mqtt::MqttIngest;
