mod fanout;
mod roster;
mod server;
mod session;

pub use fanout::{Conn, SendPool};
pub use roster::{
    GLOBAL_NAME, Group, GroupId, Invite, RESERVED_NAMES, Roster, SYSTEM_NAME, User, UserId,
    valid_name_shape,
};
pub use server::{SERVER_FULL, Server, ServerConfig, ServerError};
pub use session::{ServerState, Session};
