use std::fmt::Write as _;

use crossterm::style::{ResetColor, SetForegroundColor};

/// Terminal colors accepted by the client's `/color` command and used for
/// server-side listing decorations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Grey,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    pub const ALL: [Self; 8] = [
        Self::Grey,
        Self::Red,
        Self::Green,
        Self::Yellow,
        Self::Blue,
        Self::Magenta,
        Self::Cyan,
        Self::White,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Grey => "grey",
            Self::Red => "red",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Blue => "blue",
            Self::Magenta => "magenta",
            Self::Cyan => "cyan",
            Self::White => "white",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl From<Color> for crossterm::style::Color {
    fn from(color: Color) -> Self {
        match color {
            Color::Grey => Self::Grey,
            Color::Red => Self::Red,
            Color::Green => Self::Green,
            Color::Yellow => Self::Yellow,
            Color::Blue => Self::Blue,
            Color::Magenta => Self::Magenta,
            Color::Cyan => Self::Cyan,
            Color::White => Self::White,
        }
    }
}

/// Wraps `text` in ANSI foreground color codes.
pub fn paint(text: &str, color: Color) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let _ = write!(out, "{}{text}{}", SetForegroundColor(color.into()), ResetColor);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for color in Color::ALL {
            assert_eq!(Color::from_name(color.name()), Some(color));
        }
        assert_eq!(Color::from_name("mauve"), None);
    }

    #[test]
    fn paint_wraps_in_escape_codes() {
        let painted = paint("hello", Color::Green);
        assert!(painted.starts_with('\u{1b}'));
        assert!(painted.contains("hello"));
        assert!(painted.ends_with('m'));
    }
}
