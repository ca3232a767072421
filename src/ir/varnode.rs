//! Value references: address spaces and varnodes.

use std::fmt;

use strum::{Display, EnumIter};

/// The storage class a [`Varnode`] lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum AddressSpace {
    /// Architectural registers, laid out at fixed byte offsets by the register model
    Register,
    /// Addressable memory; also used for direct branch and call targets
    Ram,
    /// Literal constants; the offset is the value
    Const,
    /// Temporaries introduced while lowering one instruction
    Unique,
    /// Stack slots relative to the stack pointer at function entry
    Stack,
}

/// A sized reference to a storage location or a constant.
///
/// Identity covers all three fields: `rax` (8 bytes at register offset 0) and `eax`
/// (4 bytes at the same offset) are different varnodes that [overlap](Varnode::overlaps).
///
/// # Examples
///
/// ```rust
/// use irscope::ir::{AddressSpace, Varnode};
///
/// let rax = Varnode::register(0, 8);
/// let eax = rax.sub_view(0, 4);
/// assert_ne!(rax, eax);
/// assert!(rax.overlaps(&eax));
/// assert!(rax.contains(&eax));
/// assert_eq!(eax.space(), AddressSpace::Register);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Varnode {
    space: AddressSpace,
    offset: u64,
    size: u32,
}

impl Varnode {
    /// Creates a varnode in any space.
    #[must_use]
    pub const fn new(space: AddressSpace, offset: u64, size: u32) -> Self {
        Varnode {
            space,
            offset,
            size,
        }
    }

    /// A register-space varnode.
    #[must_use]
    pub const fn register(offset: u64, size: u32) -> Self {
        Self::new(AddressSpace::Register, offset, size)
    }

    /// A ram-space varnode (memory location or code address).
    #[must_use]
    pub const fn ram(address: u64, size: u32) -> Self {
        Self::new(AddressSpace::Ram, address, size)
    }

    /// A temporary.
    #[must_use]
    pub const fn unique(offset: u64, size: u32) -> Self {
        Self::new(AddressSpace::Unique, offset, size)
    }

    /// A stack slot at a signed displacement from the entry stack pointer.
    #[must_use]
    pub const fn stack(displacement: i64, size: u32) -> Self {
        Self::new(AddressSpace::Stack, displacement as u64, size)
    }

    /// A constant, truncated to `size` bytes.
    #[must_use]
    pub const fn constant(value: u64, size: u32) -> Self {
        Self::new(AddressSpace::Const, value & mask(size), size)
    }

    /// The address space.
    #[inline]
    #[must_use]
    pub const fn space(&self) -> AddressSpace {
        self.space
    }

    /// Byte offset inside the space (the value for constants).
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// One past the last byte covered.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset.wrapping_add(self.size as u64)
    }

    /// Returns `true` for constants.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self.space, AddressSpace::Const)
    }

    /// Returns `true` for register-space varnodes.
    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self.space, AddressSpace::Register)
    }

    /// Returns `true` for temporaries.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        matches!(self.space, AddressSpace::Unique)
    }

    /// Value of a constant, `None` for any other space.
    #[must_use]
    pub const fn constant_value(&self) -> Option<u64> {
        if self.is_constant() {
            Some(self.offset)
        } else {
            None
        }
    }

    /// Value of a constant, sign extended from its size.
    #[must_use]
    pub fn signed_value(&self) -> Option<i64> {
        let value = self.constant_value()?;
        let bits = self.size.saturating_mul(8).min(64);
        if bits == 0 || bits == 64 {
            return Some(value as i64);
        }
        let shift = 64 - bits;
        Some(((value << shift) as i64) >> shift)
    }

    /// Signed displacement of a stack slot.
    #[must_use]
    pub const fn stack_displacement(&self) -> Option<i64> {
        match self.space {
            AddressSpace::Stack => Some(self.offset as i64),
            _ => None,
        }
    }

    /// Returns `true` if both varnodes share at least one byte of the same space.
    ///
    /// Constants never overlap anything.
    #[must_use]
    pub fn overlaps(&self, other: &Varnode) -> bool {
        if self.space != other.space || self.is_constant() {
            return false;
        }
        self.offset < other.end() && other.offset < self.end()
    }

    /// Returns `true` if every byte of `other` lies inside `self`.
    #[must_use]
    pub fn contains(&self, other: &Varnode) -> bool {
        self.space == other.space
            && !self.is_constant()
            && self.offset <= other.offset
            && other.end() <= self.end()
    }

    /// A narrower view starting `byte_offset` bytes into this varnode.
    ///
    /// Used for sub-register names (`eax`, `ax`, `al`, `ah`).
    #[must_use]
    pub const fn sub_view(&self, byte_offset: u64, size: u32) -> Varnode {
        Varnode::new(self.space, self.offset.wrapping_add(byte_offset), size)
    }

    /// Same location with another size.
    #[must_use]
    pub const fn resized(&self, size: u32) -> Varnode {
        if self.is_constant() {
            Varnode::constant(self.offset, size)
        } else {
            Varnode::new(self.space, self.offset, size)
        }
    }
}

impl fmt::Display for Varnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.space {
            AddressSpace::Stack => {
                let displacement = self.offset as i64;
                let sign = if displacement < 0 { "-" } else { "" };
                write!(
                    f,
                    "(stack, {sign}{:#x}, {})",
                    displacement.unsigned_abs(),
                    self.size
                )
            }
            _ => write!(f, "({}, {:#x}, {})", self.space, self.offset, self.size),
        }
    }
}

/// Mask selecting the low `size` bytes.
#[must_use]
pub const fn mask(size: u32) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_is_identity() {
        assert_ne!(Varnode::register(0, 8), Varnode::register(0, 4));
        assert_eq!(Varnode::register(8, 8), Varnode::register(8, 8));
    }

    #[test]
    fn test_sub_register_overlap() {
        let rax = Varnode::register(0, 8);
        let ah = rax.sub_view(1, 1);
        let al = rax.sub_view(0, 1);
        let rcx = Varnode::register(8, 8);

        assert!(rax.contains(&ah));
        assert!(!al.overlaps(&ah));
        assert!(!rax.overlaps(&rcx));
        assert!(!Varnode::unique(0, 8).overlaps(&rax));
    }

    #[test]
    fn test_constants() {
        let c = Varnode::constant(0x1ff, 1);
        assert_eq!(c.constant_value(), Some(0xff));
        assert_eq!(c.signed_value(), Some(-1));
        assert_eq!(Varnode::constant(10, 8).signed_value(), Some(10));
        assert!(!c.overlaps(&c));
        assert_eq!(Varnode::register(0, 8).constant_value(), None);
    }

    #[test]
    fn test_stack_slot() {
        let slot = Varnode::stack(-8, 8);
        assert_eq!(slot.stack_displacement(), Some(-8));
        assert_eq!(slot.to_string(), "(stack, -0x8, 8)");
    }

    #[test]
    fn test_display() {
        assert_eq!(Varnode::register(0x10, 4).to_string(), "(register, 0x10, 4)");
        assert_eq!(Varnode::constant(0, 8).to_string(), "(const, 0x0, 8)");
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(1), 0xff);
        assert_eq!(mask(4), 0xffff_ffff);
        assert_eq!(mask(8), u64::MAX);
    }
}
