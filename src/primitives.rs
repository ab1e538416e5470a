use bytemuck::{
    AnyBitPattern,
    NoUninit,
};
use std::{
    fmt::{
        self,
        Debug,
        Display,
        Formatter,
    },
    num::ParseIntError,
    str::FromStr,
};

/// A virtual address in the target's address space.
#[repr(transparent)]
#[derive(AnyBitPattern, Clone, Copy, Default, Eq, Hash, NoUninit, Ord, PartialEq, PartialOrd)]
pub struct Va(u64);

impl Va {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn checked_add(self, rhs: u64) -> Option<Self> {
        self.0.checked_add(rhs).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: u64) -> Option<Self> {
        self.0.checked_sub(rhs).map(Self)
    }

    /// Resolves a module-relative offset against `module_base`.
    ///
    /// A 32-bit target reports a module base of zero, so its offsets come back unchanged as
    /// absolute addresses.
    #[must_use]
    pub fn resolve(module_base: Self, rva: Rva) -> Option<Self> {
        module_base.checked_add(rva.0.into())
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Debug for Va {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Va {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<Rva> for Va {
    fn from(value: Rva) -> Self {
        Self(value.0.into())
    }
}

impl From<u64> for Va {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u32> for Va {
    fn from(value: u32) -> Self {
        Self(value.into())
    }
}

impl FromStr for Va {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse(),
        }
        .map(Self)
    }
}

/// A 32-bit offset relative to the module base.
#[repr(transparent)]
#[derive(AnyBitPattern, Clone, Copy, Default, Eq, Hash, NoUninit, Ord, PartialEq, PartialOrd)]
pub struct Rva(u32);

impl Rva {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Debug for Rva {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Rva {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u32> for Rva {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Width of a pointer in the target process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    #[must_use]
    pub fn from_is_64bit(is_64bit: bool) -> Self {
        if is_64bit {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }

    #[must_use]
    pub fn bytes(self) -> u64 {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }
}
