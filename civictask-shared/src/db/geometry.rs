/// PostGIS point geometry codec
///
/// Converts a longitude/latitude point tagged with a spatial reference id to
/// and from the extended well-known-binary (EWKB) encoding used by PostGIS.
/// On the binary wire protocol PostGIS sends raw EWKB; on the text protocol it
/// sends the same bytes hex-encoded. Both are accepted when decoding.
///
/// # Layout
///
/// ```text
/// byte    order     (0 = big endian, 1 = little endian)
/// u32     type      (1 = point, | 0x2000_0000 when an SRID follows)
/// u32     srid      (only when flagged)
/// f64     x         (longitude)
/// f64     y         (latitude)
/// ```
///
/// # Example
///
/// ```
/// use civictask_shared::db::geometry::PostgisGeometry;
///
/// let geom = PostgisGeometry::point(-74.0060, 40.7128);
/// let hex = geom.to_hex().unwrap();
/// let decoded = PostgisGeometry::from_hex(&hex).unwrap();
/// assert_eq!(decoded, geom);
/// ```

use sqlx::error::BoxDynError;
use sqlx::encode::IsNull;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueFormat, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type, TypeInfo, ValueRef};

/// WGS84 longitude/latitude
pub const SRID_WGS84: i32 = 4326;

const WKB_POINT: u32 = 1;
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
const EWKB_Z_FLAG: u32 = 0x8000_0000;
const EWKB_M_FLAG: u32 = 0x4000_0000;

/// Errors produced while decoding geometry values
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeometryError {
    #[error("geometry type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("invalid hex geometry: {0}")]
    Hex(String),

    #[error("truncated geometry: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid byte order marker {0}")]
    ByteOrder(u8),
}

/// A single 2D point (x = longitude, y = latitude)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn longitude(&self) -> f64 {
        self.x
    }

    pub fn latitude(&self) -> f64 {
        self.y
    }
}

/// Point geometry stored in a PostGIS `geometry` column
///
/// An empty geometry (no point) is written as SQL `NULL` and a `NULL` column
/// reads back as an empty geometry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PostgisGeometry {
    pub point: Option<Point>,
    pub srid: i32,
}

impl PostgisGeometry {
    /// Builds a WGS84 point from longitude and latitude
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Self {
            point: Some(Point {
                x: longitude,
                y: latitude,
            }),
            srid: SRID_WGS84,
        }
    }

    /// Geometry with no underlying shape
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.point.is_none()
    }

    /// Encodes as little-endian EWKB, or `None` when the geometry is empty
    pub fn to_ewkb(&self) -> Option<Vec<u8>> {
        let point = self.point?;

        let mut buf = Vec::with_capacity(25);
        buf.push(1u8);
        if self.srid != 0 {
            buf.extend_from_slice(&(WKB_POINT | EWKB_SRID_FLAG).to_le_bytes());
            buf.extend_from_slice(&(self.srid as u32).to_le_bytes());
        } else {
            buf.extend_from_slice(&WKB_POINT.to_le_bytes());
        }
        buf.extend_from_slice(&point.x.to_le_bytes());
        buf.extend_from_slice(&point.y.to_le_bytes());

        Some(buf)
    }

    /// Encodes as hex EWKB (the text form PostGIS prints)
    pub fn to_hex(&self) -> Option<String> {
        self.to_ewkb().map(hex::encode_upper)
    }

    /// Decodes raw EWKB bytes
    ///
    /// Only point geometries are supported; Z and M ordinates are read and
    /// discarded. `POINT EMPTY` (NaN ordinates) decodes to an empty geometry.
    pub fn from_ewkb(bytes: &[u8]) -> Result<Self, GeometryError> {
        let mut reader = Reader::new(bytes)?;

        let raw_type = reader.u32()?;
        let has_srid = raw_type & EWKB_SRID_FLAG != 0;
        let has_z = raw_type & EWKB_Z_FLAG != 0;
        let has_m = raw_type & EWKB_M_FLAG != 0;
        let base_type = raw_type & 0x0FFF_FFFF;

        if base_type != WKB_POINT {
            return Err(GeometryError::TypeMismatch {
                expected: "point".to_string(),
                found: geometry_type_name(base_type).to_string(),
            });
        }

        let srid = if has_srid { reader.u32()? as i32 } else { 0 };
        let x = reader.f64()?;
        let y = reader.f64()?;
        if has_z {
            reader.f64()?;
        }
        if has_m {
            reader.f64()?;
        }

        let point = if x.is_nan() && y.is_nan() {
            None
        } else {
            Some(Point { x, y })
        };

        Ok(Self { point, srid })
    }

    /// Decodes hex EWKB
    pub fn from_hex(text: &str) -> Result<Self, GeometryError> {
        let bytes = hex::decode(text.trim()).map_err(|e| GeometryError::Hex(e.to_string()))?;
        Self::from_ewkb(&bytes)
    }
}

fn geometry_type_name(code: u32) -> &'static str {
    match code {
        1 => "point",
        2 => "linestring",
        3 => "polygon",
        4 => "multipoint",
        5 => "multilinestring",
        6 => "multipolygon",
        7 => "geometrycollection",
        _ => "unknown",
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, GeometryError> {
        let order = *bytes.first().ok_or(GeometryError::Truncated {
            needed: 1,
            available: 0,
        })?;
        let little_endian = match order {
            0 => false,
            1 => true,
            other => return Err(GeometryError::ByteOrder(other)),
        };
        Ok(Self {
            bytes,
            pos: 1,
            little_endian,
        })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], GeometryError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or(GeometryError::Truncated {
            needed: end,
            available: self.bytes.len(),
        })?;
        self.pos = end;

        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, GeometryError> {
        let raw = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn f64(&mut self) -> Result<f64, GeometryError> {
        let raw = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }
}

impl Type<Postgres> for PostgisGeometry {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("geometry")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        *ty == Self::type_info() || ty.name().eq_ignore_ascii_case("geometry")
    }
}

impl Encode<'_, Postgres> for PostgisGeometry {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        match self.to_ewkb() {
            Some(bytes) => {
                buf.extend_from_slice(&bytes);
                IsNull::No
            }
            None => IsNull::Yes,
        }
    }
}

impl<'r> Decode<'r, Postgres> for PostgisGeometry {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        if value.is_null() {
            return Ok(Self::empty());
        }

        let geometry = match value.format() {
            PgValueFormat::Binary => Self::from_ewkb(value.as_bytes()?)?,
            PgValueFormat::Text => Self::from_hex(value.as_str()?)?,
        };
        Ok(geometry)
    }
}
