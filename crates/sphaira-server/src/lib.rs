//! Authoritative Sphaira server: sessions, world bootstrap, position relay
//! and the poll loop that drives them.

pub mod error;
pub mod server;
pub mod session;
pub mod world;

pub use error::ServerError;
pub use server::{Server, ServerState};
pub use session::{MAX_SESSIONS, Session, SessionTable, SessionsFull};
pub use world::ServerWorld;
