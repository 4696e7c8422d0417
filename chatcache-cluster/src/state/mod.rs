pub mod connection_state;

pub use connection_state::ConnectionStateStore;
