use std::io::Read;

use crate::{error::WireError, stream::BufferedStream};

/// Wire signature shared by both frame variants (little-endian on the wire).
pub const SIG: u16 = 0xFE70;
/// Sender and target names carry a one-byte length prefix.
pub const NAME_MAX: usize = u8::MAX as usize;
/// Content carries a two-byte length prefix.
pub const CONTENT_MAX: usize = u16::MAX as usize;

/// Addressing context of a frame endpoint.
///
/// Senders are `User` or `System`; targets are `User` or `Group`. Decoding
/// enforces the per-field subsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Context {
    User = 1,
    Group = 2,
    System = 3,
}

impl Context {
    fn from_wire(raw: u8) -> Result<Self, WireError> {
        match raw {
            1 => Ok(Self::User),
            2 => Ok(Self::Group),
            3 => Ok(Self::System),
            other => Err(WireError::Protocol(format!("unknown context code {other}"))),
        }
    }
}

/// Frame sent by a client: `SIG ‖ TARGET_CTX ‖ TLEN ‖ TARGET ‖ CLEN ‖ CONTENT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientFrame {
    pub target_ctx: Context,
    pub target: String,
    pub content: String,
}

impl ClientFrame {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(6 + self.target.len() + self.content.len());
        out.extend_from_slice(&SIG.to_le_bytes());
        out.push(self.target_ctx as u8);
        push_name(&mut out, &self.target)?;
        push_content(&mut out, &self.content)?;
        Ok(out)
    }

    pub fn decode<R: Read>(stream: &mut BufferedStream<R>) -> Result<Self, WireError> {
        expect_sig(stream)?;
        let target_ctx = target_context(read_u8(stream)?)?;
        let target = read_name(stream)?;
        let content = read_content(stream)?;
        Ok(Self { target_ctx, target, content })
    }
}

/// Frame sent by the server:
/// `SIG ‖ SENDER_CTX ‖ TARGET_CTX ‖ SLEN ‖ SENDER ‖ TLEN ‖ TARGET ‖ CLEN ‖ CONTENT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerFrame {
    pub sender_ctx: Context,
    pub target_ctx: Context,
    pub sender: String,
    pub target: String,
    pub content: String,
}

impl ServerFrame {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out =
            Vec::with_capacity(8 + self.sender.len() + self.target.len() + self.content.len());
        out.extend_from_slice(&SIG.to_le_bytes());
        out.push(self.sender_ctx as u8);
        out.push(self.target_ctx as u8);
        push_name(&mut out, &self.sender)?;
        push_name(&mut out, &self.target)?;
        push_content(&mut out, &self.content)?;
        Ok(out)
    }

    pub fn decode<R: Read>(stream: &mut BufferedStream<R>) -> Result<Self, WireError> {
        expect_sig(stream)?;
        let sender_ctx = sender_context(read_u8(stream)?)?;
        let target_ctx = target_context(read_u8(stream)?)?;
        let sender = read_name(stream)?;
        let target = read_name(stream)?;
        let content = read_content(stream)?;
        Ok(Self { sender_ctx, target_ctx, sender, target, content })
    }
}

fn sender_context(raw: u8) -> Result<Context, WireError> {
    match Context::from_wire(raw)? {
        ctx @ (Context::User | Context::System) => Ok(ctx),
        Context::Group => {
            Err(WireError::Protocol("sender context can only be USER or SYSTEM".into()))
        }
    }
}

fn target_context(raw: u8) -> Result<Context, WireError> {
    match Context::from_wire(raw)? {
        ctx @ (Context::User | Context::Group) => Ok(ctx),
        Context::System => {
            Err(WireError::Protocol("target context can only be USER or GROUP".into()))
        }
    }
}

fn expect_sig<R: Read>(stream: &mut BufferedStream<R>) -> Result<(), WireError> {
    let sig = stream.read_exact(2)?;
    if sig != SIG.to_le_bytes() {
        return Err(WireError::Protocol(format!("invalid signature {sig:02x?}")));
    }
    Ok(())
}

fn read_u8<R: Read>(stream: &mut BufferedStream<R>) -> Result<u8, WireError> {
    Ok(stream.read_exact(1)?[0])
}

fn read_name<R: Read>(stream: &mut BufferedStream<R>) -> Result<String, WireError> {
    let len = read_u8(stream)? as usize;
    read_utf8(stream, len)
}

fn read_content<R: Read>(stream: &mut BufferedStream<R>) -> Result<String, WireError> {
    let len_bytes = stream.read_exact(2)?;
    let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
    read_utf8(stream, len)
}

fn read_utf8<R: Read>(stream: &mut BufferedStream<R>, len: usize) -> Result<String, WireError> {
    let bytes = stream.read_exact(len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| WireError::Protocol("field is not valid utf-8".into()))
}

fn push_name(out: &mut Vec<u8>, name: &str) -> Result<(), WireError> {
    if name.len() > NAME_MAX {
        return Err(WireError::Protocol(format!("name exceeds {NAME_MAX} bytes")));
    }
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

fn push_content(out: &mut Vec<u8>, content: &str) -> Result<(), WireError> {
    if content.len() > CONTENT_MAX {
        return Err(WireError::Protocol(format!("content exceeds {CONTENT_MAX} bytes")));
    }
    out.extend_from_slice(&(content.len() as u16).to_le_bytes());
    out.extend_from_slice(content.as_bytes());
    Ok(())
}
