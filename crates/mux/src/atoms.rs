//! Low-level box writing helpers.
//!
//! Boxes are written with a 4-byte size placeholder first and patched
//! once their contents are on disk, which keeps every writer a single
//! forward pass plus one seek.

use std::io::{Seek, SeekFrom, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::MuxResult;

/// Reserve a 4-byte size field at the current position and return its
/// offset for [`fill_box_size`].
pub fn box_size_placeholder<W: Write + Seek>(writer: &mut W) -> MuxResult<u64> {
    let pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    Ok(pos)
}

/// Patch a size placeholder with the distance from it to the current
/// position, then seek back to the end.
pub fn fill_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let end = writer.stream_position()?;
    let size = end - size_pos;
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

/// Write a complete full-box header with a known size.
pub fn write_full_box_header<W: Write>(
    writer: &mut W,
    box_type: &[u8; 4],
    size: u32,
    version: u8,
    flags: u32,
) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    writer.write_u32::<BigEndian>(((version as u32) << 24) | (flags & 0x00ff_ffff))?;
    Ok(())
}

pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> MuxResult<()> {
    const ZEROS: [u8; 16] = [0; 16];
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(ZEROS.len());
        writer.write_all(&ZEROS[..n])?;
        remaining -= n;
    }
    Ok(())
}

/// The identity 3x3 transformation matrix used by mvhd and tkhd.
pub fn write_unity_matrix<W: Write>(writer: &mut W) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(0x0001_0000)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(0x0001_0000)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(0x4000_0000)?;
    Ok(())
}
