use std::io::{self, Read};

use crossterm::terminal;

use crate::keys::KeySource;

/// Raw-mode stdin key source.
///
/// Enables crossterm raw mode on construction; the binary disables it again
/// on the way out. Escape sequences arrive as a burst, so reading the
/// expected tail byte-by-byte reassembles one whole key per call.
pub struct RawStdin {
    stdin: io::Stdin,
}

impl RawStdin {
    pub fn new() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self { stdin: io::stdin() })
    }

    fn byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            match self.stdin.read(&mut buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(_) => return Ok(buf[0]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl KeySource for RawStdin {
    fn next_key(&mut self) -> io::Result<Vec<u8>> {
        let lead = self.byte()?;
        let mut chunk = vec![lead];
        match lead {
            // ESC [ <final>, with a `~` tail for the numbered keys.
            0x1b => {
                let second = self.byte()?;
                chunk.push(second);
                if second == b'[' || second == b'O' {
                    let third = self.byte()?;
                    chunk.push(third);
                    if third.is_ascii_digit() {
                        loop {
                            let tail = self.byte()?;
                            chunk.push(tail);
                            if tail == b'~' {
                                break;
                            }
                        }
                    }
                }
            }
            // Legacy console pairs.
            0x00 => chunk.push(self.byte()?),
            // Continuation bytes of a utf-8 character.
            lead if lead >= 0x80 => {
                let extra = match lead {
                    0xc0..=0xdf => 1,
                    0xe0..=0xef => 2,
                    _ => 3,
                };
                for _ in 0..extra {
                    chunk.push(self.byte()?);
                }
            }
            _ => {}
        }
        Ok(chunk)
    }
}
