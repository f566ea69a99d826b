mod console;
mod dispatch;
mod keys;
mod rawkey;

pub use console::{Console, ConsoleError};
pub use dispatch::{ChatState, ClientApp, CtrlCCounter, Flow, SYSTEM_COLOR, WHISPER_COLOR};
pub use keys::{EditCmd, KeyMap, KeySource};
pub use rawkey::RawStdin;
