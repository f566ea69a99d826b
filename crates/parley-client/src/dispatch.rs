use std::{
    collections::HashMap,
    io::Write,
    net::TcpStream,
    sync::{Arc, Mutex, PoisonError},
};

use parley_utils::{Color, paint};
use parley_wire::{ClientFrame, Context, ServerFrame};
use tracing::debug;

use crate::console::Console;

/// Color of system-originated lines; carved out of the `/color` allowlist.
pub const SYSTEM_COLOR: Color = Color::Cyan;
/// Color of whispers, both incoming and the local echo.
pub const WHISPER_COLOR: Color = Color::Yellow;

const CLIENT_HELP: &str = "client commands:\n\
    /switch <group>    change the chat target\n\
    /color <color>     color the current target\n\
    /w <user> <text>   whisper a user\n\
    /exit, /quit       leave";

/// Tracks consecutive Ctrl-C strikes; the third with no successful line
/// submission in between exits the client.
#[derive(Debug, Default)]
pub struct CtrlCCounter {
    strikes: u8,
}

impl CtrlCCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this interrupt is the one to exit on.
    pub fn interrupted(&mut self) -> bool {
        self.strikes += 1;
        self.strikes >= 3
    }

    pub fn submitted(&mut self) {
        self.strikes = 0;
    }
}

/// What the chat loop should do after a submitted line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Client-side chat state: who we are, where lines go, how targets render.
pub struct ChatState {
    pub username: String,
    pub target: String,
    pub target_ctx: Context,
    pub picking_username: bool,
    colors: HashMap<String, Color>,
}

impl ChatState {
    fn new() -> Self {
        let mut colors = HashMap::new();
        colors.insert("system".to_string(), SYSTEM_COLOR);
        Self {
            username: String::new(),
            target: "global".to_string(),
            target_ctx: Context::Group,
            picking_username: false,
            colors,
        }
    }

    fn color_of(&self, target: &str) -> Color {
        self.colors.get(target).copied().unwrap_or(Color::White)
    }
}

/// Translates server frames and local `/…` commands into display updates
/// and outbound frames.
pub struct ClientApp {
    console: Arc<Console>,
    sock: Mutex<TcpStream>,
    state: Mutex<ChatState>,
}

impl ClientApp {
    pub fn new(console: Arc<Console>, sock: TcpStream) -> Self {
        Self { console, sock: Mutex::new(sock), state: Mutex::new(ChatState::new()) }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One incoming frame from the network reader.
    pub fn handle_frame(&self, frame: &ServerFrame) {
        debug!(sender = %frame.sender, target = %frame.target, "frame");
        let mut state = self.state();
        if frame.sender_ctx == Context::System {
            if frame.target_ctx == Context::User {
                self.system_sentinel(&mut state, frame);
            } else {
                let line = format!("[{}] {}: {}", frame.target, frame.sender, frame.content);
                self.console.write(&paint(&line, SYSTEM_COLOR));
            }
        } else if frame.target_ctx == Context::User && frame.target == state.username {
            let line = format!("{}: {}", frame.sender, frame.content);
            self.console.write(&paint(&line, WHISPER_COLOR));
        } else if frame.target_ctx == Context::Group {
            let prefix = paint(&format!("[{}] ", frame.target), state.color_of(&frame.target));
            self.console.write(&format!("{prefix}{}: {}", frame.sender, frame.content));
        } else {
            self.console.write(&paint("received unhandled message", Color::Red));
        }
    }

    /// SYSTEM→USER frames: control sentinels first, plain notices otherwise.
    fn system_sentinel(&self, state: &mut ChatState, frame: &ServerFrame) {
        if frame.content == "/req username" {
            state.picking_username = true;
            self.console.update_input_label("username: ");
            self.console.update_input_label_color(SYSTEM_COLOR);
        } else if let Some(name) = frame.content.strip_prefix("/set username ") {
            state.username = name.to_string();
            state.picking_username = false;
            state.target = "global".to_string();
            state.target_ctx = Context::Group;
            self.console.update_input_label("global: ");
            self.console.update_input_label_color(state.color_of("global"));
        } else if let Some(target) = frame.content.strip_prefix("/switch ") {
            state.target = target.trim().to_string();
            state.target_ctx = Context::Group;
            self.console.update_input_label(&format!("{}: ", state.target));
            let color = state.color_of(&state.target);
            self.console.update_input_label_color(color);
        } else if frame.content.starts_with("You're whispering to ") {
            self.console.write(&paint(&frame.content, WHISPER_COLOR));
        } else {
            let line = format!("{}: {}", frame.sender, frame.content);
            self.console.write(&paint(&line, SYSTEM_COLOR));
        }
    }

    /// One submitted input line; local commands stay local, the rest goes
    /// out as USER→target.
    pub fn handle_line(&self, line: &str) -> Flow {
        let line = line.trim();
        if line == "/exit" || line == "/quit" {
            return Flow::Exit;
        }

        let mut state = self.state();
        if state.picking_username {
            self.send(Context::User, "system", line);
            return Flow::Continue;
        }

        if let Some(target) = non_empty_arg(line, "/switch ") {
            state.target = target.to_string();
            state.target_ctx = Context::Group;
            self.console.update_input_label(&format!("{target}: "));
            let color = state.color_of(target);
            self.console.update_input_label_color(color);
        } else if let Some(name) = non_empty_arg(line, "/color ") {
            match Color::from_name(name).filter(|c| *c != SYSTEM_COLOR) {
                Some(color) => {
                    let target = state.target.clone();
                    state.colors.insert(target, color);
                    self.console.update_input_label_color(color);
                }
                None => {
                    let allowed: Vec<&str> = Color::ALL
                        .iter()
                        .filter(|c| **c != SYSTEM_COLOR)
                        .map(|c| c.name())
                        .collect();
                    self.error(&format!("client: allowed colors are {}", allowed.join(",")));
                }
            }
        } else if let Some(rest) = non_empty_arg(line, "/w ") {
            match rest.split_once(' ') {
                Some((user, text)) if !text.trim().is_empty() => {
                    self.send(Context::User, user.trim(), text.trim());
                }
                _ => self.error("must provide message"),
            }
        } else if line == "/help" {
            // Local surface first; the server answers with its own list.
            self.console.write(CLIENT_HELP);
            self.send(state.target_ctx, &state.target.clone(), line);
        } else {
            self.send(state.target_ctx, &state.target.clone(), line);
        }
        Flow::Continue
    }

    fn send(&self, target_ctx: Context, target: &str, content: &str) {
        let frame = ClientFrame {
            target_ctx,
            target: target.to_string(),
            content: content.to_string(),
        };
        let sent = frame.encode().map(|bytes| {
            let mut sock = self.sock.lock().unwrap_or_else(PoisonError::into_inner);
            sock.write_all(&bytes)
        });
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.error(&format!("send failed: {err}")),
            Err(err) => self.error(&format!("{err}")),
        }
    }

    fn error(&self, text: &str) {
        self.console.write(&paint(text, Color::Red));
    }
}

/// The argument after `prefix`, when present and non-empty.
fn non_empty_arg<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(str::trim).filter(|arg| !arg.is_empty())
}
