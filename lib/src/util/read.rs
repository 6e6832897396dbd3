use std::{io, io::Read};

use zerocopy::ByteOrder;

#[inline(always)]
pub fn read_u16<O, R>(reader: &mut R) -> io::Result<u16>
where
    O: ByteOrder,
    R: Read + ?Sized,
{
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(O::read_u16(&buf))
}

#[inline(always)]
pub fn read_u32<O, R>(reader: &mut R) -> io::Result<u32>
where
    O: ByteOrder,
    R: Read + ?Sized,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(O::read_u32(&buf))
}

#[inline(always)]
pub fn read_f32<O, R>(reader: &mut R) -> io::Result<f32>
where
    O: ByteOrder,
    R: Read + ?Sized,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(O::read_f32(&buf))
}

#[inline(always)]
pub fn read_f64<O, R>(reader: &mut R) -> io::Result<f64>
where
    O: ByteOrder,
    R: Read + ?Sized,
{
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(O::read_f64(&buf))
}

/// Reads `count` raw bytes. The caller bounds `count` against the input length.
#[inline]
pub fn read_bytes<R>(reader: &mut R, count: usize) -> io::Result<Vec<u8>>
where R: Read + ?Sized {
    let mut buf = vec![0u8; count];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
