//! C3: memory format catalog.
//!
//! `Layout` enumerates the physical tensor geometries from SPEC_FULL.md §3/§4.3;
//! a `Format` pairs a layout with an [`ElementType`], matching the glossary's
//! "a specific physical memory layout paired with an element type". Each
//! layout gets its own `index()` match arm, unit-tested one format at a time.

use crate::error::{Error, Result};
use crate::types::ElementType;

/// Which family of axes a layout addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisFamily {
    /// (batch, feature, y, x)
    Activation,
    /// (output_feature, input_feature, y, x)
    Weight,
    /// (input_feature, output_feature) — 2-D fully-connected weight
    WeightFc,
    /// (x) or (batch, x)
    Bias,
}

/// A physical tensor geometry, independent of element type (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Yxfb,
    Byxf,
    Bfyx,
    Fyxb,
    X,
    Xb,
    Bx,
    ByxfB24,
    BsYxfBv24,
    Oiyx,
    Yxoi,
    Oyxi,
    Yxio,
    OsIyxOsv16,
    YxoiO4,
    OsYxiSv16,
    Oi,
    Io,
    IoI13,
    IoI2,
    BsXsXsv8Bsv8,
    BsXBsv16,
    /// Matches anything; only valid as a dispatch-key wildcard (§4.6), never
    /// as a buffer's actual format.
    Any,
}

impl Layout {
    pub fn family(self) -> AxisFamily {
        use Layout::*;
        match self {
            Yxfb | Byxf | Bfyx | Fyxb | ByxfB24 | BsYxfBv24 => AxisFamily::Activation,
            Oiyx | Yxoi | Oyxi | Yxio | OsIyxOsv16 | YxoiO4 | OsYxiSv16 => AxisFamily::Weight,
            Oi | Io | IoI13 | IoI2 | BsXsXsv8Bsv8 | BsXBsv16 => AxisFamily::WeightFc,
            X | Xb | Bx => AxisFamily::Bias,
            Any => AxisFamily::Activation,
        }
    }

    /// Number of logical coordinates this layout's `index` expects.
    pub fn rank(self) -> usize {
        match self.family() {
            AxisFamily::Activation => 4,
            AxisFamily::Weight => 4,
            AxisFamily::WeightFc => 2,
            AxisFamily::Bias => match self {
                Layout::X => 1,
                _ => 2,
            },
        }
    }
}

/// A layout bound to an element type — the unit the rest of the crate
/// actually passes around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format {
    pub layout: Layout,
    pub dtype: ElementType,
}

impl Format {
    pub fn new(layout: Layout, dtype: ElementType) -> Self {
        Format { layout, dtype }
    }

    pub fn rank(self) -> usize {
        self.layout.rank()
    }
}

fn require(cond: bool, message: impl Into<String>) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::internal(message))
    }
}

/// Computes the element offset for `coords` within a buffer of `sizes`,
/// both in the layout's native coordinate order (§4.3).
///
/// Coordinate order per layout (left-to-right = slowest-to-fastest varying,
/// matching the layout's name):
/// - `yxfb`/`byxf`/`bfyx`/`fyxb`/`byxf_b24`: `[b, f, y, x]`
/// - `bs_yxf_bv24`: `[b, y, x, f]` (already batch-major; tiling is internal)
/// - `oiyx`/`yxoi`/`oyxi`/`yxio`/`os_iyx_osv16`/`yxoi_o4`/`os_yxi_sv16`: `[o, i, y, x]`
/// - `oi`/`io`/`io_i13`/`io_i2`: `[i, o]`
/// - `bs_xs_xsv8_bsv8`/`bs_x_bsv16`/`xb`/`bx`: `[b, x]`
/// - `x`: `[x]`
pub fn index(layout: Layout, sizes: &[usize], coords: &[usize]) -> Result<usize> {
    require(
        coords.len() == layout.rank() && sizes.len() == layout.rank(),
        format!(
            "format {:?} expects rank {}, got sizes={:?} coords={:?}",
            layout,
            layout.rank(),
            sizes,
            coords
        ),
    )?;
    for (c, s) in coords.iter().zip(sizes.iter()) {
        require(c < s, format!("coordinate {c} out of range for size {s} in {layout:?}"))?;
    }

    use Layout::*;
    let idx = match layout {
        Yxfb => {
            let (b, f, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (bsz, fsz, _ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            b + bsz * (f + fsz * (x + xsz * y))
        }
        Byxf => {
            let (b, f, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (_bsz, fsz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            f + fsz * (x + xsz * (y + ysz * b))
        }
        Bfyx => {
            let (b, f, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (_bsz, fsz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            x + xsz * (y + ysz * (f + fsz * b))
        }
        Fyxb => {
            let (b, f, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (bsz, _fsz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            b + bsz * (x + xsz * (y + ysz * f))
        }
        ByxfB24 => {
            let (b, f, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (bsz, fsz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            require(bsz % 24 == 0, "byxf_b24 requires batch size divisible by 24")?;
            (b % 24) + 24 * (f + fsz * (x + xsz * (y + (b / 24) * ysz)))
        }
        BsYxfBv24 => {
            let (b, y, x, f) = (coords[0], coords[1], coords[2], coords[3]);
            let (bsz, ysz, xsz, fsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            require(bsz % 24 == 0, "bs_yxf_bv24 requires batch size divisible by 24")?;
            (b % 24) + 24 * (f + fsz * (x + xsz * (y + (b / 24) * ysz)))
        }
        Oiyx => {
            let (o, i, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (_osz, isz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            x + xsz * (y + ysz * (i + isz * o))
        }
        Yxoi => {
            let (o, i, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (_osz, isz, _ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            i + isz * (o + sizes[0] * (x + xsz * y))
        }
        Oyxi => {
            let (o, i, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (_osz, isz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            i + isz * (x + xsz * (y + ysz * o))
        }
        Yxio => {
            let (o, i, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (osz, isz, _ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            o + osz * (i + isz * (x + xsz * y))
        }
        OsIyxOsv16 => {
            let (o, i, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (osz, isz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            require(osz % 16 == 0, "os_iyx_osv16 requires output feature count divisible by 16")?;
            let (slice, within) = (o / 16, o % 16);
            within + 16 * (x + xsz * (y + ysz * (i + isz * slice)))
        }
        YxoiO4 => {
            let (o, i, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (osz, isz, _ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            require(osz % 4 == 0, "yxoi_o4 requires output feature count divisible by 4")?;
            let (slice, within) = (o / 4, o % 4);
            within + 4 * (i + isz * (slice + (osz / 4) * (x + xsz * y)))
        }
        OsYxiSv16 => {
            let (o, i, y, x) = (coords[0], coords[1], coords[2], coords[3]);
            let (osz, isz, ysz, xsz) = (sizes[0], sizes[1], sizes[2], sizes[3]);
            require(osz % 16 == 0, "os_yxi_sv16 requires output feature count divisible by 16")?;
            let (slice, within) = (o / 16, o % 16);
            within + 16 * (i + isz * (x + xsz * (y + ysz * slice)))
        }
        Oi => {
            let (i, o) = (coords[0], coords[1]);
            let isz = sizes[0];
            o * isz + i
        }
        Io => {
            let (i, o) = (coords[0], coords[1]);
            let osz = sizes[1];
            o + i * osz
        }
        IoI13 | IoI2 => {
            let stride = if layout == IoI2 { 2 } else { 13 };
            let (i, o) = (coords[0], coords[1]);
            let osz = sizes[1];
            require(osz % stride == 0, "io_iN requires output feature count divisible by stride")?;
            (o % stride) + i * stride + (stride * sizes[0]) * (o / stride)
        }
        BsXsXsv8Bsv8 => {
            let (b, x) = (coords[0], coords[1]);
            let (bsz, xsz) = (sizes[0], sizes[1]);
            require(bsz % 8 == 0 && xsz % 8 == 0, "bs_xs_xsv8_bsv8 requires batch and x divisible by 8")?;
            let (bs, bv) = (b / 8, b % 8);
            let (xs, xv) = (x / 8, x % 8);
            let xs_count = xsz / 8;
            bv + 8 * (xv + 8 * (xs + xs_count * bs))
        }
        BsXBsv16 => {
            let (b, x) = (coords[0], coords[1]);
            let bsz = sizes[0];
            require(bsz % 16 == 0, "bs_x_bsv16 requires batch divisible by 16")?;
            let (bs, bv) = (b / 16, b % 16);
            bv + 16 * (x + sizes[1] * bs)
        }
        Xb => {
            let (x, b) = (coords[0], coords[1]);
            b + sizes[1] * x
        }
        Bx => {
            let (b, x) = (coords[0], coords[1]);
            x + sizes[1] * b
        }
        X => coords[0],
        Any => return Err(Error::internal("`any` is a dispatch wildcard, not an addressable format")),
    };
    Ok(idx)
}
