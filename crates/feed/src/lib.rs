pub mod replay;
pub mod rest;

pub use replay::ReplaySource;
pub use rest::BrokerClient;
