pub mod errors;
pub mod events;
pub mod ids;
pub mod payload;

pub use errors::IpcError;
pub use events::AppEvent;
pub use ids::ConnectionId;
pub use payload::Payload;
