mod builder;
mod connection;

pub use builder::ClientBuilder;
pub use connection::ClientConnection;
