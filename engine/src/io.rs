//! Reading and writing flat `u32` arrays from and to disk.
//!
//! Used for the id map which the importer has to apply to data it keeps on its side.
//! Values are stored as little endian `u32` without any header.
//!
//! # Example
//!
//! ```no_run
//! # use compressed_ch::io::*;
//! let id_map = Vec::<u32>::load_from("id_map")?;
//! id_map.write_to(&"id_map_copy")?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::{
    fs::File,
    io::{prelude::*, BufReader, BufWriter, Error, ErrorKind, Result},
    path::Path,
};

/// Objects which can be written to a file.
pub trait Store {
    fn write_into(&self, writer: &mut dyn Write) -> Result<()>;

    /// Writes the serialized object to the file with the given path
    fn write_to(&self, path: &dyn AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_into(&mut writer)?;
        writer.flush()
    }
}

impl Store for [u32] {
    fn write_into(&self, writer: &mut dyn Write) -> Result<()> {
        for value in self {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }
}

impl Store for Vec<u32> {
    fn write_into(&self, writer: &mut dyn Write) -> Result<()> {
        self[..].write_into(writer)
    }
}

/// Objects which can be read back from a file.
pub trait Load: Sized {
    fn read_from(reader: &mut dyn Read) -> Result<Self>;

    fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_from(&mut BufReader::new(File::open(path)?))
    }
}

impl Load for Vec<u32> {
    fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() % 4 != 0 {
            return Err(Error::new(ErrorKind::InvalidData, format!("{} bytes are not a sequence of u32", bytes.len())));
        }
        Ok(bytes.chunks_exact(4).map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values");
        let values = vec![0, 1, 0xDEAD_BEEF, u32::MAX];
        values.write_to(&path).unwrap();
        assert_eq!(Vec::<u32>::load_from(&path).unwrap(), values);
    }

    #[test]
    fn truncated_file_is_invalid_data() {
        let mut bytes: &[u8] = &[1, 0, 0, 0, 2];
        let err = Vec::<u32>::read_from(&mut bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
