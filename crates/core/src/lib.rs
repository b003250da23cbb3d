pub mod address;
pub mod config;
pub mod error;
pub mod message;
pub mod paths;

pub use address::{Address, AddressBook};
pub use config::Config;
pub use error::{Error, Result};
pub use message::Message;
pub use paths::Paths;
