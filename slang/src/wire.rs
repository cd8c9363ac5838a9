/// Little-endian primitives shared by the `.sc` codec, compiled
/// expressions and the data store.
use std::io::{self, Read, Write};

pub fn write_i32(w: &mut dyn Write, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_i32(r: &mut dyn Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_u64(w: &mut dyn Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u64(r: &mut dyn Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_len(w: &mut dyn Write, len: usize) -> io::Result<()> {
    let len = i32::try_from(len).map_err(|_| invalid_input("length exceeds i32"))?;
    write_i32(w, len)
}

pub fn read_len(r: &mut dyn Read) -> io::Result<usize> {
    usize::try_from(read_i32(r)?).map_err(|_| invalid_data("negative length"))
}

/// `i32` length followed by raw bytes.
pub fn write_bytes(w: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    write_len(w, bytes.len())?;
    w.write_all(bytes)
}

pub fn read_bytes(r: &mut dyn Read) -> io::Result<Vec<u8>> {
    let len = read_len(r)?;
    read_exact_vec(r, len)
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
pub fn read_exact_vec(r: &mut dyn Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut *r).take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(buf)
}

pub fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

pub fn invalid_input(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_are_length_prefixed() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"abc").unwrap();
        assert_eq!(buf, [3, 0, 0, 0, b'a', b'b', b'c']);
        assert_eq!(read_bytes(&mut buf.as_slice()).unwrap(), b"abc");
    }

    #[test]
    fn test_truncated_bytes() {
        let buf = [5u8, 0, 0, 0, b'a'];
        let err = read_bytes(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_negative_length() {
        let buf = (-1i32).to_le_bytes();
        let err = read_len(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
