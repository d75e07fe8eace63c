pub mod rcon;
pub mod stream;

pub use rcon::RconCommander;
pub use stream::StreamCommander;
