use std::{
    io::{self, Write},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use crossterm::{cursor::MoveLeft, queue};
use parley_sync::{ReentrantMutex, ReentrantRwLock};
use parley_utils::{Color, paint};
use thiserror::Error;

use crate::keys::{EditCmd, KeyMap, KeySource};

#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Ctrl-C ended the read; the buffer snapshot is in
    /// [`Console::interrupted_buffer`].
    #[error("input interrupted")]
    Interrupted,
    #[error("input read failed: {0}")]
    Read(String),
}

/// Terminal row state: the sink plus the composition drawn on it.
struct Screen {
    out: Box<dyn Write + Send>,
    label: String,
    label_color: Color,
    /// Visible composition currently on the row (label ‖ buffer, uncolored).
    last_line: String,
}

/// Line-editor state.
struct Edit {
    buffer: String,
    /// Offset into `buffer`, in chars.
    cursor: usize,
    history: Vec<String>,
    tail: usize,
    interrupted: String,
}

impl Edit {
    fn end(&self) -> usize {
        self.buffer.chars().count()
    }

    /// Byte offset of the `at`-th char.
    fn byte_at(&self, at: usize) -> usize {
        self.buffer.char_indices().nth(at).map_or(self.buffer.len(), |(i, _)| i)
    }
}

/// Interleaves a live-editable input line with asynchronous output.
///
/// Three locks carry the discipline: the reentrant stdout lock over
/// [`Screen`], the reentrant RW lock over [`Edit`], and a read gate that
/// serializes [`Console::input`] callers and marks a read in progress.
/// While a read is outstanding, any write erases the input row, emits its
/// text, then redraws `label ‖ buffer` with the cursor restored.
pub struct Console {
    screen: ReentrantMutex<Screen>,
    edit: ReentrantRwLock<Edit>,
    keys: Mutex<Box<dyn KeySource + Send>>,
    keymap: KeyMap,
    read_gate: Mutex<()>,
    reading: AtomicBool,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>, keys: Box<dyn KeySource + Send>, keymap: KeyMap) -> Self {
        Self {
            screen: ReentrantMutex::new(Screen {
                out,
                label: String::new(),
                label_color: Color::White,
                last_line: String::new(),
            }),
            edit: ReentrantRwLock::new(Edit {
                buffer: String::new(),
                cursor: 0,
                history: Vec::new(),
                tail: 0,
                interrupted: String::new(),
            }),
            keys: Mutex::new(keys),
            keymap,
            read_gate: Mutex::new(()),
            reading: AtomicBool::new(false),
        }
    }

    /// Emits a full line of output, flushing before returning. Re-renders
    /// the prompt when a read is in progress.
    pub fn write(&self, text: &str) {
        let mut screen = self.screen.lock();
        if self.reading.load(Ordering::Acquire) {
            clear_line(&mut screen);
            let _ = write!(screen.out, "{text}\r\n");
            let edit = self.edit.read();
            render_prompt(&mut screen, &edit);
        } else {
            let _ = write!(screen.out, "{text}\r\n");
            let _ = screen.out.flush();
            screen.last_line.clear();
        }
    }

    pub fn update_input_label(&self, label: &str) {
        let mut screen = self.screen.lock();
        screen.label = label.to_string();
        if self.reading.load(Ordering::Acquire) {
            let edit = self.edit.read();
            render_prompt(&mut screen, &edit);
        }
    }

    pub fn update_input_label_color(&self, color: Color) {
        let mut screen = self.screen.lock();
        screen.label_color = color;
        if self.reading.load(Ordering::Acquire) {
            let edit = self.edit.read();
            render_prompt(&mut screen, &edit);
        }
    }

    /// Replaces the editable buffer, cursor at the end.
    pub fn update_input_buffer(&self, text: &str) {
        {
            let mut edit = self.edit.write();
            edit.buffer = text.to_string();
            edit.cursor = edit.end();
        }
        if self.reading.load(Ordering::Acquire) {
            self.rerender();
        }
    }

    /// Snapshot taken when Ctrl-C ended a read.
    pub fn interrupted_buffer(&self) -> String {
        self.edit.read().interrupted.clone()
    }

    /// Runs one interactive read and returns the submitted line.
    ///
    /// Fails with [`ConsoleError::Interrupted`] on Ctrl-C and
    /// [`ConsoleError::Read`] on a key-source failure. Concurrent callers
    /// are serialized by the read gate; label, color and buffer stay
    /// updatable from other threads for the whole read.
    pub fn input(
        &self,
        label: Option<&str>,
        color: Option<Color>,
        history: Vec<String>,
    ) -> Result<String, ConsoleError> {
        let _gate = self.read_gate.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut edit = self.edit.write();
            edit.buffer.clear();
            edit.cursor = 0;
            edit.tail = history.len();
            edit.history = history;
            edit.interrupted.clear();
        }
        {
            let mut screen = self.screen.lock();
            if let Some(label) = label {
                screen.label = label.to_string();
            }
            if let Some(color) = color {
                screen.label_color = color;
            }
        }

        self.reading.store(true, Ordering::Release);
        self.rerender();
        let outcome = self.read_loop();
        self.reading.store(false, Ordering::Release);

        match outcome {
            Ok(Ending::Submitted) => {
                let mut edit = self.edit.write();
                edit.cursor = 0;
                Ok(std::mem::take(&mut edit.buffer))
            }
            Ok(Ending::Interrupted) => {
                let mut edit = self.edit.write();
                edit.buffer.clear();
                edit.cursor = 0;
                Err(ConsoleError::Interrupted)
            }
            Err(err) => Err(ConsoleError::Read(err.to_string())),
        }
    }

    fn read_loop(&self) -> io::Result<Ending> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let chunk = keys.next_key()?;
            match chunk.as_slice() {
                [] => {}
                [b'\r' | b'\n'] => {
                    clear_line(&mut self.screen.lock());
                    return Ok(Ending::Submitted);
                }
                [0x03] => {
                    {
                        let mut edit = self.edit.write();
                        edit.interrupted = edit.buffer.clone();
                    }
                    clear_line(&mut self.screen.lock());
                    return Ok(Ending::Interrupted);
                }
                [0x08 | 0x7f] => {
                    {
                        let mut edit = self.edit.write();
                        if edit.cursor > 0 {
                            let at = edit.byte_at(edit.cursor - 1);
                            edit.buffer.remove(at);
                            edit.cursor -= 1;
                        }
                    }
                    self.rerender();
                }
                [0..=31] => {} // remaining control bytes are discarded
                [0x00 | 0x1b, ..] => match self.keymap.lookup(&chunk) {
                    Some(cmd) => self.apply(cmd),
                    None => self.write(&format!("unhandled control: {chunk:02x?}")),
                },
                _ => {
                    if let Ok(text) = std::str::from_utf8(&chunk) {
                        self.insert(text);
                    }
                }
            }
        }
    }

    fn insert(&self, text: &str) {
        {
            let mut edit = self.edit.write();
            for ch in text.chars() {
                let at = edit.byte_at(edit.cursor);
                edit.buffer.insert(at, ch);
                edit.cursor += 1;
            }
        }
        self.rerender();
    }

    fn apply(&self, cmd: EditCmd) {
        {
            let mut edit = self.edit.write();
            match cmd {
                EditCmd::Up => {
                    if edit.tail > 0 {
                        edit.tail -= 1;
                        if let Some(line) = edit.history.get(edit.tail).cloned() {
                            edit.buffer = line;
                            edit.cursor = edit.end();
                        }
                    }
                }
                EditCmd::Down => {
                    if edit.tail + 1 < edit.history.len() {
                        edit.tail += 1;
                        edit.buffer = edit.history[edit.tail].clone();
                        edit.cursor = edit.end();
                    }
                }
                EditCmd::Left => {
                    if edit.cursor > 0 {
                        edit.cursor -= 1;
                    }
                }
                EditCmd::Right => {
                    if edit.cursor < edit.end() {
                        edit.cursor += 1;
                    }
                }
                EditCmd::DeleteForward => {
                    if edit.cursor < edit.end() {
                        let at = edit.byte_at(edit.cursor);
                        edit.buffer.remove(at);
                    }
                }
            }
        }
        self.rerender();
    }

    fn rerender(&self) {
        let mut screen = self.screen.lock();
        let edit = self.edit.read();
        render_prompt(&mut screen, &edit);
    }
}

enum Ending {
    Submitted,
    Interrupted,
}

/// `\r`, blanks over the previous composition, `\r`.
fn clear_line(screen: &mut Screen) {
    let blanks = " ".repeat(screen.last_line.chars().count());
    let _ = write!(screen.out, "\r{blanks}\r");
    screen.last_line.clear();
    let _ = screen.out.flush();
}

/// Redraws `label ‖ buffer` and walks the cursor back to its offset.
fn render_prompt(screen: &mut Screen, edit: &Edit) {
    clear_line(screen);
    screen.last_line = format!("{}{}", screen.label, edit.buffer);
    let painted = paint(&screen.label, screen.label_color);
    let _ = write!(screen.out, "{painted}{}", edit.buffer);
    let rest = edit.end() - edit.cursor;
    if rest > 0 {
        let _ = queue!(screen.out, MoveLeft(rest as u16));
    }
    let _ = screen.out.flush();
}
