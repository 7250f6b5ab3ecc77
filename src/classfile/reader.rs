use crate::error::{Error, Result};

/// Big-endian cursor over class-file bytes. Reads past the end are reported
/// as format errors against the class being decoded.
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
    class: &'a str,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8], class: &'a str) -> Self {
        Self {
            bytes,
            position: 0,
            class,
        }
    }

    pub fn tell(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.bytes.len() {
            return Err(self.truncated(position - self.position));
        }
        self.position = position;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.truncated(n));
        }
        let s = &self.bytes[self.position..self.position + n];
        self.position += n;
        Ok(s)
    }

    pub fn u1(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u2(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u4(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn truncated(&self, wanted: usize) -> Error {
        Error::class_format(
            self.class,
            format!(
                "truncated class file: wanted {} bytes at offset {}, {} available",
                wanted,
                self.position,
                self.remaining()
            ),
        )
    }
}
