pub mod chunker;
pub mod cipher;
pub mod client;
pub mod config;
pub mod handshake;
pub mod keys;
pub mod packet;
pub mod parity;
pub mod session;
pub mod transport;
pub mod util;

#[cfg(test)] pub mod test_util;
