//! Big-endian TLS wire helpers: a bounds-checked reader and length-prefixed writers.

use crate::error::{Error, Result};

/// Cursor over a handshake or extension body.
///
/// Every read is bounds-checked; running off the end is a decode error.
#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::handshake(format!(
                "decode error: need {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u24(&mut self) -> Result<usize> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    pub(crate) fn vec8(&mut self) -> Result<&'a [u8]> {
        let n = self.u8()? as usize;
        self.take(n)
    }

    pub(crate) fn vec16(&mut self) -> Result<&'a [u8]> {
        let n = self.u16()? as usize;
        self.take(n)
    }

    pub(crate) fn vec24(&mut self) -> Result<&'a [u8]> {
        let n = self.u24()?;
        self.take(n)
    }

    /// Fail unless the body was consumed exactly.
    pub(crate) fn finish(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::handshake(format!(
                "decode error: {} trailing bytes in {}",
                self.remaining(),
                what
            )))
        }
    }
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
}

pub(crate) fn put_vec8(out: &mut Vec<u8>, body: &[u8]) {
    out.push(body.len() as u8);
    out.extend_from_slice(body);
}

pub(crate) fn put_vec16(out: &mut Vec<u8>, body: &[u8]) {
    put_u16(out, body.len() as u16);
    out.extend_from_slice(body);
}

/// Write a 16-bit length prefix around whatever `f` appends.
pub(crate) fn with_len16(out: &mut Vec<u8>, f: impl FnOnce(&mut Vec<u8>)) {
    let at = out.len();
    out.extend_from_slice(&[0, 0]);
    f(out);
    let len = (out.len() - at - 2) as u16;
    out[at..at + 2].copy_from_slice(&len.to_be_bytes());
}

/// Write a 24-bit length prefix around whatever `f` appends.
pub(crate) fn with_len24(out: &mut Vec<u8>, f: impl FnOnce(&mut Vec<u8>)) {
    let at = out.len();
    out.extend_from_slice(&[0, 0, 0]);
    f(out);
    let len = out.len() - at - 3;
    out[at..at + 3].copy_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
}

/// Frame a handshake message: type, 24-bit length, body.
pub(crate) fn handshake_message(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(msg_type);
    put_u24(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_bounds() {
        let mut r = Reader::new(&[0x01, 0x00, 0x02, 0xaa, 0xbb, 0xcc]);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.vec16().unwrap(), &[0xaa, 0xbb]);
        assert_eq!(r.remaining(), 1);
        assert!(r.u16().is_err());
        assert!(r.finish("test").is_err());
    }

    #[test]
    fn test_u24() {
        let mut r = Reader::new(&[0x01, 0x02, 0x03]);
        assert_eq!(r.u24().unwrap(), 0x010203);
        assert!(r.finish("test").is_ok());
    }

    #[test]
    fn test_length_prefixes() {
        let mut out = Vec::new();
        with_len16(&mut out, |out| {
            with_len24(out, |out| out.extend_from_slice(b"abc"));
        });
        assert_eq!(out, vec![0, 6, 0, 0, 3, b'a', b'b', b'c']);

        let msg = handshake_message(20, &[9; 12]);
        assert_eq!(&msg[..4], &[20, 0, 0, 12]);
    }
}
