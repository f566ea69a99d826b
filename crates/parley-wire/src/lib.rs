mod error;
mod frame;
mod stream;

pub use error::WireError;
pub use frame::{CONTENT_MAX, ClientFrame, Context, NAME_MAX, SIG, ServerFrame};
pub use stream::BufferedStream;
