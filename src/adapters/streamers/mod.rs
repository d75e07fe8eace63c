pub mod tcp;

pub use tcp::TcpStreamer;
