pub mod broker;
pub mod codec;
pub mod config;
pub mod connection;
pub mod peer;

pub use broker::Broker;
pub use codec::PayloadCodec;
pub use config::{BrokerConfig, PeerConfig, DEFAULT_SOCKET_PATH};
pub use connection::{ConnectionHandle, Handler, HandlerRegistry};
pub use peer::Peer;
