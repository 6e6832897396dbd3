pub mod xof;

use std::fmt::{Debug, Display, Formatter, Write};

use binrw::binrw;
use glam::{Mat4, Vec2, Vec3, Vec4};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::array_ref;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(transparent)]
pub struct FourCC(pub [u8; 4]);

impl Display for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0 {
            f.write_char(c as char)?;
        }
        Ok(())
    }
}

impl Debug for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_char('"')?;
        for c in self.0 {
            f.write_char(c as char)?;
        }
        f.write_char('"')?;
        Ok(())
    }
}

impl PartialEq<[u8; 4]> for FourCC {
    fn eq(&self, other: &[u8; 4]) -> bool { &self.0 == other }
}

/// Reads the first four bytes of `data`, if there are that many.
#[inline]
pub fn peek_four_cc(data: &[u8]) -> Option<FourCC> {
    (data.len() >= 4).then(|| FourCC(*array_ref!(data, 0, 4)))
}

/// `Coords2d`
#[binrw]
#[derive(Clone, Debug)]
pub struct CVector2f {
    pub u: f32,
    pub v: f32,
}

/// `Vector`
#[binrw]
#[derive(Clone, Debug)]
pub struct CVector3f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// `ColorRGB`
#[binrw]
#[derive(Clone, Debug)]
pub struct CColor3f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// `ColorRGBA`
#[binrw]
#[derive(Clone, Debug)]
pub struct CColor4f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// `Matrix4x4`, row-major with row vectors as stored by Direct3D.
#[binrw]
#[derive(Clone, Debug)]
pub struct CMatrix4f {
    pub m: [f32; 16],
}

impl From<CVector2f> for Vec2 {
    fn from(v: CVector2f) -> Self { Vec2::new(v.u, v.v) }
}

impl From<CVector3f> for Vec3 {
    fn from(v: CVector3f) -> Self { Vec3::new(v.x, v.y, v.z) }
}

impl From<CColor3f> for Vec3 {
    fn from(c: CColor3f) -> Self { Vec3::new(c.r, c.g, c.b) }
}

impl From<CColor4f> for Vec4 {
    fn from(c: CColor4f) -> Self { Vec4::new(c.r, c.g, c.b, c.a) }
}

impl From<CMatrix4f> for Mat4 {
    // Row-major row-vector storage is the same memory as column-major
    // column-vector storage.
    fn from(m: CMatrix4f) -> Self { Mat4::from_cols_array(&m.m) }
}
