// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error;
use std::io::{self, ErrorKind, Read};

/// Wraps a reader and returns an error once more than `max_size` bytes have
/// been read, defending against endless-data responses.
pub(crate) struct MaxSizeAdapter<R> {
    reader: R,
    /// Names the configuration that set the limit, for error messages.
    specifier: &'static str,
    max_size: u64,
    counter: u64,
}

impl<R> MaxSizeAdapter<R> {
    pub(crate) fn new(reader: R, specifier: &'static str, max_size: u64) -> Self {
        Self {
            reader,
            specifier,
            max_size,
            counter: 0,
        }
    }
}

impl<R: Read> Read for MaxSizeAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.reader.read(buf)?;
        self.counter = self.counter.saturating_add(size as u64);
        if self.counter > self.max_size {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                error::Error::MaxSizeExceeded {
                    max_size: self.max_size,
                    specifier: self.specifier,
                },
            ));
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::MaxSizeAdapter;
    use std::io::{Cursor, Read};

    #[test]
    fn allows_up_to_the_limit() {
        let mut reader = MaxSizeAdapter::new(Cursor::new(b"hello".to_vec()), "test", 5);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn rejects_beyond_the_limit() {
        let mut reader = MaxSizeAdapter::new(Cursor::new(b"hello".to_vec()), "test", 4);
        let mut buf = Vec::new();
        assert!(reader.read_to_end(&mut buf).is_err());
    }
}
