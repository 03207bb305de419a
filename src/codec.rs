//! Decoders for the raw SSH channel-request payloads this gateway cares
//! about: `env`, `pty-req`, `window-change` and `exec`. Every decoder
//! returns [`CodecError::Malformed`] when the declared length of an embedded
//! string would run past the end of the payload, mirroring the bounds
//! checks `chanWorker.go` does by hand.
//!
//! `russh` hands these requests to the session handler already parsed into
//! typed callback arguments (`env_request`, `pty_request`, ...), so in
//! normal operation these functions see payloads the library has already
//! validated. They stay a standalone, independently-tested module because
//! the wire format is the part of this gateway most worth pinning down
//! exactly, and because it is the natural place to keep the one piece of
//! client-controlled parsing we still have to do by hand: splitting an
//! `exec` command string into argv tokens.

use byteorder::{BigEndian, ByteOrder};

use crate::error::CodecError;

type Result<T> = std::result::Result<T, CodecError>;

/// Reads one SSH length-prefixed string (`u32` big-endian length followed
/// by that many bytes) from the front of `buf`, returning the string slice
/// and the remainder of `buf` after it.
fn read_string(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    if buf.len() < 4 {
        return Err(CodecError::Malformed);
    }
    let len = BigEndian::read_u32(&buf[..4]) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(CodecError::Malformed);
    }
    Ok((&rest[..len], &rest[len..]))
}

fn read_u32(buf: &[u8]) -> Result<(u32, &[u8])> {
    if buf.len() < 4 {
        return Err(CodecError::Malformed);
    }
    Ok((BigEndian::read_u32(&buf[..4]), &buf[4..]))
}

/// Decodes an `env` channel-request payload: two back-to-back
/// length-prefixed strings, `name` then `value`.
pub fn decode_env(payload: &[u8]) -> Result<(String, String)> {
    let (name, rest) = read_string(payload)?;
    let (value, _) = read_string(rest)?;
    Ok((
        String::from_utf8_lossy(name).into_owned(),
        String::from_utf8_lossy(value).into_owned(),
    ))
}

/// Decodes a `pty-req` channel-request payload: a length-prefixed `TERM`
/// string (skipped) followed by `cols, rows, width_px, height_px` as
/// big-endian `u32`s. Returns `(cols, rows)`.
pub fn decode_pty_req(payload: &[u8]) -> Result<(u32, u32)> {
    let (_term, rest) = read_string(payload)?;
    let (cols, rest) = read_u32(rest)?;
    let (rows, _rest) = read_u32(rest)?;
    Ok((cols, rows))
}

/// Decodes a `window-change` channel-request payload: `cols, rows,
/// width_px, height_px` as big-endian `u32`s. Returns `(cols, rows)`.
pub fn decode_window_change(payload: &[u8]) -> Result<(u32, u32)> {
    let (cols, rest) = read_u32(payload)?;
    let (rows, _rest) = read_u32(rest)?;
    Ok((cols, rows))
}

/// Splits an `exec` command string into argv tokens on ASCII space
/// boundaries, preserving order, with no quoting or escape support. This is
/// a known limitation carried over from the original gateway: arguments
/// containing spaces or quotes are mis-handled.
pub fn split_exec_command(command: &str) -> Vec<String> {
    command
        .split(' ')
        .filter(|tok| !tok.is_empty())
        .map(str::to_string)
        .collect()
}
