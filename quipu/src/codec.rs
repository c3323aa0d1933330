//! Self-describing binary encoding used by the Quipu container.
//!
//! Every multi-byte value is written in host byte order with no padding.
//! Files are therefore only portable between machines of the same
//! endianness, which matches how the tools that produce them are deployed.
//!
//! Values come in three shapes:
//!
//! - raw values (`write_value`), no tag;
//! - typed values (`write_typed_value`), a `u16` scalar tag followed by the
//!   value, readable into any other primitive with numeric conversion;
//! - tagged vectors and matrices (`write_vec`, `write_mat`), a class tag, the
//!   dimensions as `u8`, then the elements (matrices column-major).

use std::io::{Read, Seek, SeekFrom, Write};

use bytemuck::Pod;

use crate::error::{QuipuError, Result};
use crate::raster::Resolution;

/// Upper bound for any length prefix read from a stream.
///
/// Lengths beyond this are treated as corruption rather than allocated.
pub const MAX_BLOCK_BYTES: u64 = 1 << 36;

/// Largest buffer reserved up front from a length read off the stream.
pub const MAX_PREALLOC: usize = 1 << 20;

/// Tags for the ten primitive scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ScalarType {
    F32 = 1,
    F64 = 2,
    U8 = 3,
    U16 = 4,
    U32 = 5,
    U64 = 6,
    I8 = 7,
    I16 = 8,
    I32 = 9,
    I64 = 10,
}

impl ScalarType {
    /// Decode a scalar tag.
    pub fn from_code(code: u16) -> Result<Self> {
        Ok(match code {
            1 => Self::F32,
            2 => Self::F64,
            3 => Self::U8,
            4 => Self::U16,
            5 => Self::U32,
            6 => Self::U64,
            7 => Self::I8,
            8 => Self::I16,
            9 => Self::I32,
            10 => Self::I64,
            other => return Err(unknown_or_unexpected(other, "scalar")),
        })
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Encoded size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::F32 | Self::U32 | Self::I32 => 4,
            Self::F64 | Self::U64 | Self::I64 => 8,
        }
    }
}

/// Precision of the elements of a tagged vector or matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    Single,
    Double,
}

/// Tags for composite values and container classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ClassId {
    Vec1F = 1001,
    Vec2F = 1002,
    Vec3F = 1003,
    Vec4F = 1004,
    Vec1D = 1005,
    Vec2D = 1006,
    Vec3D = 1007,
    Vec4D = 1008,
    Mat2F = 1009,
    Mat2D = 1010,
    Mat3F = 1011,
    Mat3D = 1012,
    Mat4F = 1013,
    Mat4D = 1014,
    TransformState = 2000,
    Dem = 2001,
    DemPyramid = 2002,
    Undefined = 65535,
}

const CLASS_TABLE: [ClassId; 18] = [
    ClassId::Vec1F,
    ClassId::Vec2F,
    ClassId::Vec3F,
    ClassId::Vec4F,
    ClassId::Vec1D,
    ClassId::Vec2D,
    ClassId::Vec3D,
    ClassId::Vec4D,
    ClassId::Mat2F,
    ClassId::Mat2D,
    ClassId::Mat3F,
    ClassId::Mat3D,
    ClassId::Mat4F,
    ClassId::Mat4D,
    ClassId::TransformState,
    ClassId::Dem,
    ClassId::DemPyramid,
    ClassId::Undefined,
];

impl ClassId {
    /// Decode a class tag.
    pub fn from_code(code: u16) -> Result<Self> {
        CLASS_TABLE
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or_else(|| unknown_or_unexpected(code, "class"))
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Tag of a vector with `len` elements of the given width.
    pub fn vector(width: FloatWidth, len: usize) -> Option<Self> {
        use ClassId::*;
        match (width, len) {
            (FloatWidth::Single, 1) => Some(Vec1F),
            (FloatWidth::Single, 2) => Some(Vec2F),
            (FloatWidth::Single, 3) => Some(Vec3F),
            (FloatWidth::Single, 4) => Some(Vec4F),
            (FloatWidth::Double, 1) => Some(Vec1D),
            (FloatWidth::Double, 2) => Some(Vec2D),
            (FloatWidth::Double, 3) => Some(Vec3D),
            (FloatWidth::Double, 4) => Some(Vec4D),
            _ => None,
        }
    }

    /// Tag of a square matrix of order `n`.
    pub fn matrix(width: FloatWidth, n: usize) -> Option<Self> {
        use ClassId::*;
        match (width, n) {
            (FloatWidth::Single, 2) => Some(Mat2F),
            (FloatWidth::Double, 2) => Some(Mat2D),
            (FloatWidth::Single, 3) => Some(Mat3F),
            (FloatWidth::Double, 3) => Some(Mat3D),
            (FloatWidth::Single, 4) => Some(Mat4F),
            (FloatWidth::Double, 4) => Some(Mat4D),
            _ => None,
        }
    }

    /// Element width and length for vector tags.
    pub fn vector_layout(self) -> Option<(FloatWidth, usize)> {
        use ClassId::*;
        match self {
            Vec1F => Some((FloatWidth::Single, 1)),
            Vec2F => Some((FloatWidth::Single, 2)),
            Vec3F => Some((FloatWidth::Single, 3)),
            Vec4F => Some((FloatWidth::Single, 4)),
            Vec1D => Some((FloatWidth::Double, 1)),
            Vec2D => Some((FloatWidth::Double, 2)),
            Vec3D => Some((FloatWidth::Double, 3)),
            Vec4D => Some((FloatWidth::Double, 4)),
            _ => None,
        }
    }

    /// Element width and order for matrix tags.
    pub fn matrix_layout(self) -> Option<(FloatWidth, usize)> {
        use ClassId::*;
        match self {
            Mat2F => Some((FloatWidth::Single, 2)),
            Mat2D => Some((FloatWidth::Double, 2)),
            Mat3F => Some((FloatWidth::Single, 3)),
            Mat3D => Some((FloatWidth::Double, 3)),
            Mat4F => Some((FloatWidth::Single, 4)),
            Mat4D => Some((FloatWidth::Double, 4)),
            _ => None,
        }
    }
}

/// A tag that is known, but of the wrong kind, is a class mismatch rather
/// than an unknown tag.
fn unknown_or_unexpected(code: u16, wanted: &str) -> QuipuError {
    let is_scalar = (1..=10).contains(&code);
    let is_class = CLASS_TABLE.iter().any(|c| c.code() == code);
    match (wanted, is_scalar, is_class) {
        ("scalar", false, true) | ("class", true, false) => QuipuError::UnexpectedClass {
            expected: ClassId::Undefined.code(),
            found: code,
        },
        _ => QuipuError::UnknownTypeTag(code),
    }
}

/// A decoded scalar, widened to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Float(f64),
    Unsigned(u64),
    Signed(i64),
}

/// A primitive that can be written raw or with a scalar tag.
pub trait Primitive: Pod + PartialEq + std::fmt::Debug + Send + Sync {
    const TYPE: ScalarType;

    /// Numeric conversion with `as` semantics (float to int saturates).
    fn from_scalar(value: Scalar) -> Self;

    fn into_scalar(self) -> Scalar;
}

/// Element types accepted by tagged vectors and matrices.
pub trait FloatPrimitive: Primitive {
    const WIDTH: FloatWidth;
}

macro_rules! impl_primitive {
    ($t:ty, $tag:ident, $kind:ident, $wide:ty) => {
        impl Primitive for $t {
            const TYPE: ScalarType = ScalarType::$tag;

            #[inline]
            fn from_scalar(value: Scalar) -> Self {
                match value {
                    Scalar::Float(v) => v as $t,
                    Scalar::Unsigned(v) => v as $t,
                    Scalar::Signed(v) => v as $t,
                }
            }

            #[inline]
            fn into_scalar(self) -> Scalar {
                Scalar::$kind(self as $wide)
            }
        }
    };
}

impl_primitive!(f32, F32, Float, f64);
impl_primitive!(f64, F64, Float, f64);
impl_primitive!(u8, U8, Unsigned, u64);
impl_primitive!(u16, U16, Unsigned, u64);
impl_primitive!(u32, U32, Unsigned, u64);
impl_primitive!(u64, U64, Unsigned, u64);
impl_primitive!(i8, I8, Signed, i64);
impl_primitive!(i16, I16, Signed, i64);
impl_primitive!(i32, I32, Signed, i64);
impl_primitive!(i64, I64, Signed, i64);

impl FloatPrimitive for f32 {
    const WIDTH: FloatWidth = FloatWidth::Single;
}

impl FloatPrimitive for f64 {
    const WIDTH: FloatWidth = FloatWidth::Double;
}

// ---------------------------------------------------------------------------
// Raw values
// ---------------------------------------------------------------------------

/// Write a value in host byte order. Returns the number of bytes written.
pub fn write_value<T: Pod, W: Write>(writer: &mut W, value: T) -> Result<usize> {
    writer.write_all(bytemuck::bytes_of(&value))?;
    Ok(std::mem::size_of::<T>())
}

/// Read a value written by [`write_value`].
pub fn read_value<T: Pod, R: Read>(reader: &mut R) -> Result<T> {
    let mut value = T::zeroed();
    reader.read_exact(bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}

/// Write a slice of values with no length prefix.
pub fn write_slice<T: Pod, W: Write>(writer: &mut W, values: &[T]) -> Result<usize> {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    writer.write_all(bytes)?;
    Ok(bytes.len())
}

/// Read exactly `len` bytes.
///
/// The buffer grows with the bytes actually present, so a corrupt length
/// cannot force a large allocation. A short stream is `CorruptFile`.
pub fn read_bytes<R: Read>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    if len > MAX_BLOCK_BYTES {
        return Err(QuipuError::CorruptFile(format!(
            "block length {len} exceeds limit"
        )));
    }
    let mut bytes = Vec::with_capacity((len as usize).min(MAX_PREALLOC));
    reader.take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(QuipuError::CorruptFile(format!(
            "truncated block: expected {len} bytes, found {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Reinterpret host-order bytes as a vector of `T`.
///
/// Copies, so the source buffer needs no particular alignment.
pub fn cast_bytes<T: Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(QuipuError::CorruptFile(format!(
            "{} bytes is not a whole number of {size}-byte samples",
            bytes.len()
        )));
    }
    let mut out = vec![T::zeroed(); bytes.len() / size];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}

fn checked_len(count: u64, elem_size: usize) -> Result<usize> {
    let bytes = count.checked_mul(elem_size as u64);
    match bytes {
        Some(b) if b <= MAX_BLOCK_BYTES => Ok(count as usize),
        _ => Err(QuipuError::CorruptFile(format!(
            "length prefix {count} exceeds limit"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Typed scalars
// ---------------------------------------------------------------------------

/// Write `(tag: u16, value)`.
pub fn write_typed_value<T: Primitive, W: Write>(writer: &mut W, value: T) -> Result<usize> {
    let mut written = write_value(writer, T::TYPE.code())?;
    written += write_value(writer, value)?;
    Ok(written)
}

/// Read a scalar of the given type, widened.
pub fn read_scalar<R: Read>(reader: &mut R, ty: ScalarType) -> Result<Scalar> {
    Ok(match ty {
        ScalarType::F32 => read_value::<f32, _>(reader)?.into_scalar(),
        ScalarType::F64 => read_value::<f64, _>(reader)?.into_scalar(),
        ScalarType::U8 => read_value::<u8, _>(reader)?.into_scalar(),
        ScalarType::U16 => read_value::<u16, _>(reader)?.into_scalar(),
        ScalarType::U32 => read_value::<u32, _>(reader)?.into_scalar(),
        ScalarType::U64 => read_value::<u64, _>(reader)?.into_scalar(),
        ScalarType::I8 => read_value::<i8, _>(reader)?.into_scalar(),
        ScalarType::I16 => read_value::<i16, _>(reader)?.into_scalar(),
        ScalarType::I32 => read_value::<i32, _>(reader)?.into_scalar(),
        ScalarType::I64 => read_value::<i64, _>(reader)?.into_scalar(),
    })
}

/// Read a typed value and convert it to `T`.
pub fn read_typed_value<T: Primitive, R: Read>(reader: &mut R) -> Result<T> {
    let code: u16 = read_value(reader)?;
    let ty = ScalarType::from_code(code)?;
    Ok(T::from_scalar(read_scalar(reader, ty)?))
}

// ---------------------------------------------------------------------------
// Length-prefixed sequences
// ---------------------------------------------------------------------------

/// Write `(len: u64, elements)`.
pub fn write_vector<T: Pod, W: Write>(writer: &mut W, values: &[T]) -> Result<usize> {
    let mut written = write_value(writer, values.len() as u64)?;
    written += write_slice(writer, values)?;
    Ok(written)
}

pub fn read_vector<T: Pod, R: Read>(reader: &mut R) -> Result<Vec<T>> {
    let count: u64 = read_value(reader)?;
    let len = checked_len(count, std::mem::size_of::<T>())?;
    let bytes = read_bytes(reader, (len * std::mem::size_of::<T>()) as u64)?;
    cast_bytes(&bytes)
}

/// Write `(len: u64, utf-8 bytes)`.
pub fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<usize> {
    write_vector(writer, value.as_bytes())
}

pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let bytes: Vec<u8> = read_vector(reader)?;
    String::from_utf8(bytes).map_err(|e| QuipuError::CorruptFile(format!("string: {e}")))
}

// ---------------------------------------------------------------------------
// Tagged vectors and matrices
// ---------------------------------------------------------------------------

/// Write a class tag.
pub fn write_class_id<W: Write>(writer: &mut W, class: ClassId) -> Result<usize> {
    write_value(writer, class.code())
}

pub fn read_class_id<R: Read>(reader: &mut R) -> Result<ClassId> {
    let code: u16 = read_value(reader)?;
    ClassId::from_code(code)
}

/// Read a class tag and require it to be `expected`.
pub fn expect_class<R: Read>(reader: &mut R, expected: ClassId) -> Result<()> {
    let found = read_class_id(reader)?;
    if found != expected {
        return Err(QuipuError::UnexpectedClass {
            expected: expected.code(),
            found: found.code(),
        });
    }
    Ok(())
}

fn read_float_as<F: FloatPrimitive, R: Read>(reader: &mut R, width: FloatWidth) -> Result<F> {
    Ok(match width {
        FloatWidth::Single => F::from_scalar(read_value::<f32, _>(reader)?.into_scalar()),
        FloatWidth::Double => F::from_scalar(read_value::<f64, _>(reader)?.into_scalar()),
    })
}

/// Write `(tag, dim: u8, elements)`.
pub fn write_vec<F: FloatPrimitive, W: Write, const N: usize>(
    writer: &mut W,
    values: &[F; N],
) -> Result<usize> {
    let class = ClassId::vector(F::WIDTH, N).ok_or(QuipuError::DimensionMismatch {
        expected: 4,
        found: N,
    })?;
    let mut written = write_class_id(writer, class)?;
    written += write_value(writer, N as u8)?;
    written += write_slice(writer, values)?;
    Ok(written)
}

/// Read a tagged vector of `N` elements, converting precision if needed.
pub fn read_vec<F: FloatPrimitive, R: Read, const N: usize>(reader: &mut R) -> Result<[F; N]> {
    let class = read_class_id(reader)?;
    let (width, tag_len) = class.vector_layout().ok_or(QuipuError::UnexpectedClass {
        expected: ClassId::vector(F::WIDTH, N)
            .unwrap_or(ClassId::Undefined)
            .code(),
        found: class.code(),
    })?;
    let dim = read_value::<u8, _>(reader)? as usize;
    if dim != tag_len {
        return Err(QuipuError::CorruptFile(format!(
            "vector tag {} declares {tag_len} elements but stores {dim}",
            class.code()
        )));
    }
    if dim != N {
        return Err(QuipuError::DimensionMismatch {
            expected: N,
            found: dim,
        });
    }
    let mut out = [F::zeroed(); N];
    for value in out.iter_mut() {
        *value = read_float_as(reader, width)?;
    }
    Ok(out)
}

/// Write a square matrix given as `N` columns of `N` rows.
///
/// Layout: `(tag, rows: u8, cols: u8, elements column-major)`.
pub fn write_mat<F: FloatPrimitive, W: Write, const N: usize>(
    writer: &mut W,
    columns: &[[F; N]; N],
) -> Result<usize> {
    let class = ClassId::matrix(F::WIDTH, N).ok_or(QuipuError::DimensionMismatch {
        expected: 4,
        found: N,
    })?;
    let mut written = write_class_id(writer, class)?;
    written += write_value(writer, N as u8)?;
    written += write_value(writer, N as u8)?;
    for column in columns {
        written += write_slice(writer, column)?;
    }
    Ok(written)
}

/// Read a square matrix as columns, converting precision if needed.
pub fn read_mat<F: FloatPrimitive, R: Read, const N: usize>(
    reader: &mut R,
) -> Result<[[F; N]; N]> {
    let class = read_class_id(reader)?;
    let (width, order) = class.matrix_layout().ok_or(QuipuError::UnexpectedClass {
        expected: ClassId::matrix(F::WIDTH, N)
            .unwrap_or(ClassId::Undefined)
            .code(),
        found: class.code(),
    })?;
    let rows = read_value::<u8, _>(reader)? as usize;
    let cols = read_value::<u8, _>(reader)? as usize;
    if rows != order || cols != order {
        return Err(QuipuError::CorruptFile(format!(
            "matrix tag {} declares order {order} but stores {rows}x{cols}",
            class.code()
        )));
    }
    if order != N {
        return Err(QuipuError::DimensionMismatch {
            expected: N,
            found: order,
        });
    }
    let mut out = [[F::zeroed(); N]; N];
    for column in out.iter_mut() {
        for value in column.iter_mut() {
            *value = read_float_as(reader, width)?;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

/// Write a resolution as two `u32`.
pub fn write_resolution<W: Write>(writer: &mut W, resolution: Resolution) -> Result<usize> {
    let width = u32::try_from(resolution.width)
        .map_err(|_| QuipuError::InvalidPyramid(format!("width {} too large", resolution.width)))?;
    let height = u32::try_from(resolution.height).map_err(|_| {
        QuipuError::InvalidPyramid(format!("height {} too large", resolution.height))
    })?;
    Ok(write_value(writer, width)? + write_value(writer, height)?)
}

pub fn read_resolution<R: Read>(reader: &mut R) -> Result<Resolution> {
    let width: u32 = read_value(reader)?;
    let height: u32 = read_value(reader)?;
    let resolution = Resolution::new(width as usize, height as usize);
    match resolution.checked_pixel_count() {
        Some(n) if n as u64 <= MAX_BLOCK_BYTES => Ok(resolution),
        _ => Err(QuipuError::CorruptFile(format!(
            "resolution {width}x{height} exceeds limit"
        ))),
    }
}

/// Advance the stream by `count` bytes.
pub fn skip_bytes<S: Seek>(stream: &mut S, count: u64) -> Result<u64> {
    let offset = i64::try_from(count)
        .map_err(|_| QuipuError::CorruptFile(format!("skip of {count} bytes")))?;
    Ok(stream.seek(SeekFrom::Current(offset))?)
}
