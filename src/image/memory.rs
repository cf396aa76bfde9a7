use super::Backend;
use crate::Result;

/// Host image bytes that were read or synthesized before parsing
#[derive(Debug)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Buffer { bytes }
    }
}

impl Backend for Buffer {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(out_of_bounds_error!())
    }

    fn data(&self) -> &[u8] {
        &self.bytes
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}
