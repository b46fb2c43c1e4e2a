//! Shared wire protocol for the wavecast control channel.
//!
//! Clients drive the server with framed commands over a plain TCP stream:
//!
//! - signature: 1 ASCII byte selecting the command
//! - `'f'` (upload): `u32 name_len`, name bytes, `u32 body_len`, body bytes
//! - `'q'` (enqueue): `u32 name_len`, name bytes
//!
//! All integers are big-endian (network byte order). There is no connection
//! prelude and no response framing: the server answers with bare
//! back-to-back JSON state documents on the same stream.

use std::io::{self, Read, Write};

/// Signature byte for an upload command.
pub const SIG_UPLOAD: u8 = b'f';
/// Signature byte for an enqueue command.
pub const SIG_ENQUEUE: u8 = b'q';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Upload,
    Enqueue,
}

impl Signature {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        match b {
            SIG_UPLOAD => Ok(Signature::Upload),
            SIG_ENQUEUE => Ok(Signature::Enqueue),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown command signature {b:#x}"),
            )),
        }
    }
}

/// Read a length-prefixed name field.
///
/// The caller has already consumed the signature byte; this reads
/// `u32 name_len` plus exactly that many bytes of UTF-8.
pub fn read_name(mut r: impl Read) -> io::Result<String> {
    let len = read_u32(&mut r)?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "name not utf-8"))
}

/// Read the `u32 body_len` field of an upload command.
///
/// The body itself is streamed by the caller so large uploads never have to
/// sit in memory.
pub fn read_body_len(r: impl Read) -> io::Result<u32> {
    read_u32(r)
}

/// Encode a complete upload command.
pub fn write_upload(mut w: impl Write, name: &str, body: &[u8]) -> io::Result<()> {
    w.write_all(&[SIG_UPLOAD])?;
    write_name(&mut w, name)?;
    let len: u32 = body
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "body too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(body)?;
    Ok(())
}

/// Encode a complete enqueue command.
pub fn write_enqueue(mut w: impl Write, name: &str) -> io::Result<()> {
    w.write_all(&[SIG_ENQUEUE])?;
    write_name(&mut w, name)?;
    Ok(())
}

fn write_name(mut w: impl Write, name: &str) -> io::Result<()> {
    let len: u32 = name
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name too long"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(name.as_bytes())?;
    Ok(())
}

fn read_u32(mut r: impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
