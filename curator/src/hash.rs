use std::{
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

use md5::{Digest, Md5};

use crate::error::{Error, Result};

const OSHASH_CHUNK_SIZE: u64 = 64 * 1024;

/// Fast identity hash over file size plus head and tail byte windows,
/// suitable for large video files without a full read. The two windows
/// overlap for files smaller than 128 KiB.
pub fn oshash_from_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|err| Error::io(path, err))?;
    let size = file
        .metadata()
        .map_err(|err| Error::io(path, err))?
        .len();
    oshash(&mut file, size).map_err(|err| Error::io(path, err))
}

fn oshash<R: Read + Seek>(reader: &mut R, size: u64) -> io::Result<String> {
    if size < 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file is too small to hash",
        ));
    }

    let chunk = OSHASH_CHUNK_SIZE.min(size) as usize;
    let mut head = vec![0u8; chunk];
    let mut tail = vec![0u8; chunk];

    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut head)?;
    reader.seek(SeekFrom::End(-(chunk as i64)))?;
    reader.read_exact(&mut tail)?;

    let mut result = size;
    for window in head.chunks_exact(8) {
        result = result.wrapping_add(u64::from_le_bytes(window.try_into().unwrap()));
    }
    for window in tail.chunks_exact(8) {
        result = result.wrapping_add(u64::from_le_bytes(window.try_into().unwrap()));
    }

    Ok(format!("{result:016x}"))
}

/// Full-content MD5 checksum of a file on disk.
pub fn md5_from_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path).map_err(|err| Error::io(path, err))?;
    md5_from_reader(file).map_err(|err| Error::io(path, err))
}

pub fn md5_from_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// MD5 of an arbitrary string, used to key folder galleries by their
/// directory path rather than by file content.
pub fn md5_from_str(value: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn md5_known_vectors() {
        assert_eq!(md5_from_str(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_from_str("hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn md5_file_matches_reader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"some file content").unwrap();
        let from_file = md5_from_file(&path).unwrap();
        let from_reader = md5_from_reader(&b"some file content"[..]).unwrap();
        assert_eq!(from_file, from_reader);
    }

    #[test]
    fn oshash_is_deterministic_and_content_sensitive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("video.bin");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&vec![7u8; 200 * 1024]).unwrap();
        drop(file);

        let first = oshash_from_file(&path).unwrap();
        let second = oshash_from_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

        fs::write(&path, vec![8u8; 200 * 1024]).unwrap();
        let changed = oshash_from_file(&path).unwrap();
        assert_ne!(first, changed);
    }

    #[test]
    fn oshash_rejects_tiny_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.bin");
        fs::write(&path, b"1234").unwrap();
        assert!(oshash_from_file(&path).is_err());
    }
}
