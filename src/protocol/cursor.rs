use crate::error::Error;

/// Bounds checked big endian reader over a response body
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    what: &'static str,
}

impl<'a> Cursor<'a> {
    /// `what` names the response in the error raised on a short read
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Cursor { data, what }
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if len > self.data.len() {
            return Err(Error::MalformedResponse(self.what));
        }

        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, Error> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.bytes(2)?);
        Ok(u16::from_be_bytes(buf))
    }

    pub fn u32(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    pub fn u64(&mut self) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
