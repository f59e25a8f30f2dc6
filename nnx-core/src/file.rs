//! C13: `.nnd` weight file format.
//!
//! Fixed at the v3 extended header (§6):
//!
//! ```text
//! offset  size  field
//! 0       3     magic = "nnd"
//! 3       1     data_type ∈ {'F','H','b','B'}
//! 4       1     version = 3
//! 5       1     dimension ∈ {1,2,3,4}
//! 6       1     sizeof_value; must match data_type
//! 7       1     layout code
//! 8       8*D   sizes as u64 little-endian
//! ...     K     raw element bytes
//! ```

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::format::{Format, Layout};
use crate::shape::Shape;
use crate::types::ElementType;

const MAGIC: [u8; 3] = *b"nnd";
const VERSION: u8 = 3;

/// Parsed `.nnd` contents: element type, dimension, per-axis sizes and raw
/// little-endian element bytes, from which a `file` primitive's output
/// buffer is populated (§3 "Weight file record").
#[derive(Debug, Clone, PartialEq)]
pub struct FileData {
    pub dtype: ElementType,
    pub dimension: u8,
    pub sizes: Vec<u64>,
    pub bytes: Vec<u8>,
}

impl FileData {
    /// The shape this record implies, applying the `dimension == 3` →
    /// `bfyx`-with-batch-1 special case from §6.
    pub fn shape(&self) -> Shape {
        if self.dimension == 3 {
            Shape::new(1, self.sizes[2] as usize, &[self.sizes[0] as usize, self.sizes[1] as usize])
        } else {
            let raw: Vec<usize> = self.sizes.iter().map(|&s| s as usize).collect();
            let end = raw.len();
            Shape::from_raw(raw, 0..1, 1..2, 2..end)
        }
    }

    /// The format this record implies: `bfyx` for the 3-D special case,
    /// otherwise a generic layout of matching rank is left to the caller.
    pub fn format(&self) -> Format {
        Format::new(Layout::Bfyx, self.dtype)
    }
}

fn nnd_tag(dtype: ElementType) -> u8 {
    match dtype {
        ElementType::F32 => b'F',
        ElementType::F16 => b'H',
        ElementType::I8 => b'b',
        ElementType::U8 => b'B',
    }
}

/// Reads a `.nnd` record from `reader`, validating magic/version/dimension/
/// sizeof_value agreement (§4.13).
pub fn read(mut reader: impl Read) -> Result<FileData> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;

    if header[0..3] != MAGIC {
        return Err(Error::IoError { message: "bad .nnd magic".to_string() });
    }
    let dtype = ElementType::from_nnd_tag(header[3])
        .ok_or_else(|| Error::IoError { message: format!("unknown .nnd data type tag {:?}", header[3] as char) })?;
    let version = header[4];
    if version != VERSION {
        return Err(Error::IoError { message: format!("unsupported .nnd version {version}") });
    }
    let dimension = header[5];
    if !(1..=4).contains(&dimension) {
        return Err(Error::IoError { message: format!("invalid .nnd dimension {dimension}") });
    }
    let sizeof_value = header[6];
    if sizeof_value as usize != dtype.size_bytes() {
        return Err(Error::IoError {
            message: format!("sizeof_value {sizeof_value} does not match data type {:?}", dtype),
        });
    }
    let _layout_code = header[7];

    let mut sizes = Vec::with_capacity(dimension as usize);
    for _ in 0..dimension {
        let mut word = [0u8; 8];
        reader.read_exact(&mut word)?;
        sizes.push(u64::from_le_bytes(word));
    }

    let element_count: u64 = sizes.iter().product();
    let byte_count = element_count * dtype.size_bytes() as u64;
    let mut bytes = vec![0u8; byte_count as usize];
    reader.read_exact(&mut bytes)?;

    tracing::info!(?dtype, ?sizes, "loaded .nnd file");
    Ok(FileData { dtype, dimension, sizes, bytes })
}

/// Writes `data` in the v3 `.nnd` layout, deriving the layout code from
/// `layout` rather than hard-coding one (§9: the original `serialize_train`
/// wrote a fixed layout byte regardless of the buffer's actual format).
///
/// Test-only: used to build round-trip fixtures for the loader above.
pub fn write(mut writer: impl Write, data: &FileData, layout: Layout) -> Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[nnd_tag(data.dtype)])?;
    writer.write_all(&[VERSION])?;
    writer.write_all(&[data.dimension])?;
    writer.write_all(&[data.dtype.size_bytes() as u8])?;
    writer.write_all(&[layout as u8])?;
    for &size in &data.sizes {
        writer.write_all(&size.to_le_bytes())?;
    }
    writer.write_all(&data.bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> FileData {
        FileData { dtype: ElementType::F32, dimension: 3, sizes: vec![2, 2, 3], bytes: vec![0u8; 2 * 2 * 3 * 4] }
    }

    #[test]
    fn round_trip_preserves_shape_dtype_and_bytes() {
        let data = sample();
        let mut buf = Vec::new();
        write(&mut buf, &data, Layout::Bfyx).unwrap();
        let parsed = read(Cursor::new(buf)).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn dimension_three_maps_to_bfyx_batch_one() {
        let data = sample();
        let shape = data.shape();
        assert_eq!(shape.batch(), &[1]);
        assert_eq!(shape.feature(), &[3]);
        assert_eq!(shape.spatial(), &[2, 2]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        write(&mut buf, &sample(), Layout::Bfyx).unwrap();
        buf[0] = b'x';
        assert!(read(Cursor::new(buf)).is_err());
    }

    #[test]
    fn sizeof_value_mismatch_is_rejected() {
        let mut buf = Vec::new();
        write(&mut buf, &sample(), Layout::Bfyx).unwrap();
        buf[6] = 9;
        assert!(read(Cursor::new(buf)).is_err());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut buf = Vec::new();
        write(&mut buf, &sample(), Layout::Bfyx).unwrap();
        buf[4] = 1;
        assert!(read(Cursor::new(buf)).is_err());
    }
}
