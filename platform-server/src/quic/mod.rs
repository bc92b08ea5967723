mod connection;
mod server;

pub use server::QuicServer;
