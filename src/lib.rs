// AnonChat - ephemeral, serverless LAN chat
// Library entry point

mod chat;
mod cli;
mod crypto;
mod discovery;
mod error;
mod identity;
mod net;
mod room;
mod runtime;
mod settings;
mod store;
mod transport;

pub use chat::Chat;
pub use cli::{handle_command, print_banner, print_help, print_menu, LogBuffer};
pub use crypto::CryptoBox;
pub use discovery::{Discovery, PeerEntry};
pub use error::{AnonchatError, Result};
pub use identity::Identity;
pub use net::default_interface_ip;
pub use room::{Room, RoomEvent, RoomManager};
pub use runtime::Runtime;
pub use settings::Settings;
pub use store::{InMemoryStore, Message, MessageStore, SqliteStore};
pub use transport::Transport;
