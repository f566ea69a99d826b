use std::io;

/// Source of whole keypresses: a single byte, a utf-8 character, or a
/// complete escape sequence. Raw-mode terminal reading lives behind this;
/// tests feed scripts through it.
pub trait KeySource {
    fn next_key(&mut self) -> io::Result<Vec<u8>>;
}

/// Line-editing commands escape sequences can map to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditCmd {
    Up,
    Down,
    Left,
    Right,
    DeleteForward,
}

/// Escape-sequence dispatch table. The dialects are data, not code, so a
/// different terminal only needs a different table.
pub struct KeyMap {
    entries: Vec<(&'static [u8], EditCmd)>,
}

impl KeyMap {
    /// ANSI/VT arrows and delete: `ESC [ A/B/D/C` and `ESC [ 3 ~`.
    pub fn posix() -> Self {
        Self {
            entries: vec![
                (b"\x1b[A", EditCmd::Up),
                (b"\x1b[B", EditCmd::Down),
                (b"\x1b[D", EditCmd::Left),
                (b"\x1b[C", EditCmd::Right),
                (b"\x1b[3~", EditCmd::DeleteForward),
            ],
        }
    }

    /// Legacy console arrows arrive as a NUL-prefixed pair.
    pub fn windows_console() -> Self {
        Self { entries: vec![(b"\x00H", EditCmd::Up), (b"\x00P", EditCmd::Down)] }
    }

    /// Both dialects at once; what the interactive client installs.
    pub fn universal() -> Self {
        let mut map = Self::posix();
        map.entries.extend(Self::windows_console().entries);
        map
    }

    pub fn lookup(&self, chunk: &[u8]) -> Option<EditCmd> {
        self.entries.iter().find(|(seq, _)| *seq == chunk).map(|(_, cmd)| *cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_arrows_resolve() {
        let map = KeyMap::posix();
        assert_eq!(map.lookup(b"\x1b[A"), Some(EditCmd::Up));
        assert_eq!(map.lookup(b"\x1b[3~"), Some(EditCmd::DeleteForward));
        assert_eq!(map.lookup(b"\x00H"), None);
    }

    #[test]
    fn universal_merges_dialects() {
        let map = KeyMap::universal();
        assert_eq!(map.lookup(b"\x00H"), Some(EditCmd::Up));
        assert_eq!(map.lookup(b"\x00P"), Some(EditCmd::Down));
        assert_eq!(map.lookup(b"\x1b[C"), Some(EditCmd::Right));
        assert_eq!(map.lookup(b"\x1b[Z"), None);
    }
}
