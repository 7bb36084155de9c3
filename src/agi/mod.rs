pub mod channel;
pub mod env;
pub mod fastagi;

pub use channel::{AgiChannel, AgiError, AgiReply, AgiSession};
pub use env::AgiEnv;
