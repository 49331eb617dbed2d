use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("not enough bytes to read")]
    NotEnoughBytes,

    #[error("invalid value for {0}")]
    InvalidValue(&'static str),

    #[error("invalid utf-8 string")]
    InvalidString,
}

// Cursor over a byte slice, used to decode canonical bytes
pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, total: 0 }
    }

    pub fn total_size(&self) -> usize {
        self.total + self.bytes.len()
    }

    pub fn total_read(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn advance(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        if self.bytes.len() < n {
            return Err(ReaderError::NotEnoughBytes);
        }
        let (taken, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        self.total += n;
        Ok(taken)
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue("bool")),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.advance(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        let bytes = self.advance(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        let bytes = self.advance(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        let bytes = self.advance(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReaderError> {
        Ok(self.advance(n)?.to_vec())
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        let bytes = self.advance(32)?;
        Ok(bytes.try_into().unwrap())
    }

    pub fn read_string(&mut self, n: usize) -> Result<String, ReaderError> {
        let bytes = self.read_bytes(n)?;
        String::from_utf8(bytes).map_err(|_| ReaderError::InvalidString)
    }
}
