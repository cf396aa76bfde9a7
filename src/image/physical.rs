use super::Backend;
use crate::{Error::FileError, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// Host image backed by a read-only memory mapping of the file on disk
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Map the file at `path`
    ///
    /// ## Arguments
    /// * 'path' - The host binary on disk
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;

        // The host keeps its own binary open and never rewrites it while running.
        let mmap = unsafe { Mmap::map(&file) }.map_err(FileError)?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical() {
        let temp_path = std::env::temp_dir().join("hostlink_physical_test.bin");
        std::fs::write(&temp_path, [0x4D, 0x5A, 0x90, 0x00, 0x03]).unwrap();

        let physical = Physical::new(&temp_path).unwrap();
        assert_eq!(physical.len(), 5);
        assert_eq!(physical.data()[0], 0x4D);
        assert_eq!(physical.data_slice(1, 3).unwrap(), &[0x5A, 0x90, 0x00]);
        assert!(physical.data_slice(4, 2).is_err());
        assert!(physical.data_slice(usize::MAX, 1).is_err());

        drop(physical);
        std::fs::remove_file(&temp_path).unwrap();
    }

    #[test]
    fn test_physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/host.exe");
        match result {
            Err(FileError(io_error)) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("Expected FileError, got {other:?}"),
        }
    }
}
