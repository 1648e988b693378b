mod error;
pub use error::Error;

mod config;
pub use config::ProtocolConfig;

mod trytes;
pub use trytes::*;

mod address;
pub use address::*;

mod crypto;
pub use crypto::*;

pub mod codec;

mod transport;
pub use transport::*;

mod cache;
pub use cache::*;

pub mod memory;

mod identity;
pub use identity::Identity;

mod contact;
pub use contact::*;

mod exchange;
pub use exchange::ContactExchange;

mod rotation;

mod chat;
pub use chat::*;

mod poller;
pub use poller::*;
