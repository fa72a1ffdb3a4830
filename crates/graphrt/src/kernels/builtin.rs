use std::marker::PhantomData;

use bytemuck::Pod;

use super::{Kernel, KernelArg, KernelContext};
use crate::error::RuntimeResult;

pub const VECTOR_ADD_I32: &str = "vector_add_i32";
pub const VECTOR_ADD_F32: &str = "vector_add_f32";
pub const VECTOR_SQUARE_F32: &str = "vector_square_f32";
pub const BIT_EXTRACT_U32: &str = "bit_extract_u32";
pub const BIT_EXTRACT_U64: &str = "bit_extract_u64";
pub const BIT_INSERT_U32: &str = "bit_insert_u32";
pub const BIT_INSERT_U64: &str = "bit_insert_u64";
pub const EMPTY_KERNEL: &str = "empty";

/// Element types the arithmetic kernels operate on. Integer arithmetic wraps like the device.
pub trait Arith: Pod + Send + Sync {
    const NAME: &'static str;

    fn add(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
}

impl Arith for i32 {
    const NAME: &'static str = "i32";

    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }

    fn mul(self, other: Self) -> Self {
        self.wrapping_mul(other)
    }
}

impl Arith for f32 {
    const NAME: &'static str = "f32";

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn mul(self, other: Self) -> Self {
        self * other
    }
}

/// `c[i] = a[i] + b[i]` for `i < n`; arguments `(a, b, c, n)`.
///
/// Grid-stride: every element is covered regardless of the launch size.
pub struct VectorAdd<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Arith> VectorAdd<T> {
    pub fn new() -> Self {
        Self {
            name: format!("vector_add_{}", T::NAME),
            _marker: PhantomData,
        }
    }
}

impl<T: Arith> Default for VectorAdd<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Arith> Kernel for VectorAdd<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &KernelContext<'_>, args: &[KernelArg]) -> RuntimeResult<()> {
        let a = ctx.arg_ptr(args, 0)?;
        let b = ctx.arg_ptr(args, 1)?;
        let c = ctx.arg_ptr(args, 2)?;
        let n = ctx.arg_len(args, 3)?;
        let lhs = ctx.read::<T>(a, n)?;
        let rhs = ctx.read::<T>(b, n)?;
        let out: Vec<T> = lhs.iter().zip(&rhs).map(|(x, y)| x.add(*y)).collect();
        ctx.write(c, &out)
    }
}

/// `c[i] = a[i] * a[i]` for `i < n`; arguments `(a, c, n)`.
pub struct VectorSquare<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Arith> VectorSquare<T> {
    pub fn new() -> Self {
        Self {
            name: format!("vector_square_{}", T::NAME),
            _marker: PhantomData,
        }
    }
}

impl<T: Arith> Default for VectorSquare<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Arith> Kernel for VectorSquare<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &KernelContext<'_>, args: &[KernelArg]) -> RuntimeResult<()> {
        let a = ctx.arg_ptr(args, 0)?;
        let c = ctx.arg_ptr(args, 1)?;
        let n = ctx.arg_len(args, 2)?;
        let input = ctx.read::<T>(a, n)?;
        let out: Vec<T> = input.iter().map(|x| x.mul(*x)).collect();
        ctx.write(c, &out)
    }
}

pub fn bit_extract_u32(src0: u32, src1: u32, src2: u32) -> u32 {
    let offset = src1 & 31;
    let width = src2 & 31;
    if width == 0 {
        return 0;
    }
    src0.wrapping_shl(32u32.wrapping_sub(width).wrapping_sub(offset))
        .wrapping_shr(32 - width)
}

pub fn bit_extract_u64(src0: u64, src1: u32, src2: u32) -> u64 {
    let offset = src1 & 63;
    let width = src2 & 63;
    if width == 0 {
        return 0;
    }
    src0.wrapping_shl(64u32.wrapping_sub(width).wrapping_sub(offset))
        .wrapping_shr(64 - width)
}

pub fn bit_insert_u32(src0: u32, src1: u32, src2: u32, src3: u32) -> u32 {
    let offset = src2 & 31;
    let width = src3 & 31;
    let mask = (1u32 << width).wrapping_sub(1);
    (src0 & !(mask << offset)) | ((src1 & mask) << offset)
}

pub fn bit_insert_u64(src0: u64, src1: u64, src2: u32, src3: u32) -> u64 {
    let offset = src2 & 63;
    let width = src3 & 63;
    let mask = (1u64 << width).wrapping_sub(1);
    (src0 & !(mask << offset)) | ((src1 & mask) << offset)
}

/// Word types with device bit-field intrinsics.
pub trait BitWord: Pod + Send + Sync {
    const NAME: &'static str;

    fn extract(self, offset: u32, width: u32) -> Self;
    fn insert(self, field: Self, offset: u32, width: u32) -> Self;
}

impl BitWord for u32 {
    const NAME: &'static str = "u32";

    fn extract(self, offset: u32, width: u32) -> Self {
        bit_extract_u32(self, offset, width)
    }

    fn insert(self, field: Self, offset: u32, width: u32) -> Self {
        bit_insert_u32(self, field, offset, width)
    }
}

impl BitWord for u64 {
    const NAME: &'static str = "u64";

    fn extract(self, offset: u32, width: u32) -> Self {
        bit_extract_u64(self, offset, width)
    }

    fn insert(self, field: Self, offset: u32, width: u32) -> Self {
        bit_insert_u64(self, field, offset, width)
    }
}

/// One thread per element: `out[x] = extract(src0[x], offset[x], width[x])`.
/// Arguments `(out, src0, offsets, widths)`; offsets and widths are `u32` arrays.
pub struct BitExtract<W> {
    name: String,
    _marker: PhantomData<fn() -> W>,
}

impl<W: BitWord> BitExtract<W> {
    pub fn new() -> Self {
        Self {
            name: format!("bit_extract_{}", W::NAME),
            _marker: PhantomData,
        }
    }
}

impl<W: BitWord> Default for BitExtract<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: BitWord> Kernel for BitExtract<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &KernelContext<'_>, args: &[KernelArg]) -> RuntimeResult<()> {
        let threads = ctx.total_threads();
        let out = ctx.arg_ptr(args, 0)?;
        let src0 = ctx.read::<W>(ctx.arg_ptr(args, 1)?, threads)?;
        let offsets = ctx.read::<u32>(ctx.arg_ptr(args, 2)?, threads)?;
        let widths = ctx.read::<u32>(ctx.arg_ptr(args, 3)?, threads)?;
        let result: Vec<W> = (0..threads)
            .map(|x| src0[x].extract(offsets[x], widths[x]))
            .collect();
        ctx.write(out, &result)
    }
}

/// One thread per element: `out[x] = insert(src0[x], src1[x], offset[x], width[x])`.
/// Arguments `(out, src0, src1, offsets, widths)`.
pub struct BitInsert<W> {
    name: String,
    _marker: PhantomData<fn() -> W>,
}

impl<W: BitWord> BitInsert<W> {
    pub fn new() -> Self {
        Self {
            name: format!("bit_insert_{}", W::NAME),
            _marker: PhantomData,
        }
    }
}

impl<W: BitWord> Default for BitInsert<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: BitWord> Kernel for BitInsert<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &KernelContext<'_>, args: &[KernelArg]) -> RuntimeResult<()> {
        let threads = ctx.total_threads();
        let out = ctx.arg_ptr(args, 0)?;
        let src0 = ctx.read::<W>(ctx.arg_ptr(args, 1)?, threads)?;
        let src1 = ctx.read::<W>(ctx.arg_ptr(args, 2)?, threads)?;
        let offsets = ctx.read::<u32>(ctx.arg_ptr(args, 3)?, threads)?;
        let widths = ctx.read::<u32>(ctx.arg_ptr(args, 4)?, threads)?;
        let result: Vec<W> = (0..threads)
            .map(|x| src0[x].insert(src1[x], offsets[x], widths[x]))
            .collect();
        ctx.write(out, &result)
    }
}

/// Does nothing; used to measure dispatch overhead.
#[derive(Default)]
pub struct EmptyKernel;

impl Kernel for EmptyKernel {
    fn name(&self) -> &str {
        EMPTY_KERNEL
    }

    fn execute(&self, _ctx: &KernelContext<'_>, _args: &[KernelArg]) -> RuntimeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_reads_the_requested_field() {
        assert_eq!(bit_extract_u32(0xF0, 4, 4), 0xF);
        assert_eq!(bit_extract_u32(0xDEAD_BEEF, 16, 16), 0xDEAD);
        assert_eq!(bit_extract_u32(0xFFFF_FFFF, 3, 0), 0);
        assert_eq!(bit_extract_u64(0xABCD_0000_0000_0000, 48, 16), 0xABCD);
    }

    #[test]
    fn insert_replaces_only_the_field() {
        assert_eq!(bit_insert_u32(0xFFFF_FFFF, 0, 8, 8), 0xFFFF_00FF);
        assert_eq!(bit_insert_u32(0, 0x1FF, 4, 8), 0xFF0);
        assert_eq!(bit_insert_u64(0, 0xF, 60, 4), 0xF000_0000_0000_0000);
        // A zero width leaves the word untouched.
        assert_eq!(bit_insert_u64(0x1234, 0xFFFF, 0, 0), 0x1234);
    }

    #[test]
    fn kernel_names_follow_element_type() {
        assert_eq!(VectorAdd::<i32>::new().name(), VECTOR_ADD_I32);
        assert_eq!(VectorAdd::<f32>::new().name(), VECTOR_ADD_F32);
        assert_eq!(VectorSquare::<f32>::new().name(), VECTOR_SQUARE_F32);
        assert_eq!(BitExtract::<u64>::new().name(), BIT_EXTRACT_U64);
        assert_eq!(BitInsert::<u32>::new().name(), BIT_INSERT_U32);
    }
}
