use crate::{
    error::{
        Error,
        Result,
    },
    primitives::{
        PointerWidth,
        Va,
    },
};
use bstr::BString;
use bytemuck::AnyBitPattern;
use byteorder::{
    ByteOrder as _,
    LittleEndian,
};
use smallvec::SmallVec;
use std::mem;

/// Access to the address space of a foreign process.
///
/// Implementations own whatever handle the target requires.
pub trait MemoryAccessor {
    fn is_readable(&self, address: Va) -> bool;

    /// Fills `buffer` with the bytes at `address`.
    ///
    /// Inaccessible memory must be reported as [`Error::Unreadable`]; any other failure of the
    /// underlying read is an [`Error::ReadFailure`].
    fn read_bytes(&self, address: Va, buffer: &mut [u8]) -> Result<()>;

    fn is_64bit(&self) -> bool;

    /// Load address of the module whose RTTI is being decoded.
    fn module_base(&self) -> Va;
}

impl<T> MemoryAccessor for &T
where
    T: MemoryAccessor + ?Sized,
{
    fn is_readable(&self, address: Va) -> bool {
        (**self).is_readable(address)
    }

    fn read_bytes(&self, address: Va, buffer: &mut [u8]) -> Result<()> {
        (**self).read_bytes(address, buffer)
    }

    fn is_64bit(&self) -> bool {
        (**self).is_64bit()
    }

    fn module_base(&self) -> Va {
        (**self).module_base()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StringEncoding {
    /// Single byte units, decoded as lossy utf-8.
    #[default]
    Narrow,
    /// Little endian utf-16 units.
    Wide,
}

/// Upper bound on the number of units read for one null-terminated string.
const MAX_STRING_UNITS: usize = 0x1000;
const STRING_CHUNK: usize = 0x40;

/// Typed reads against one target.
///
/// The pointer width and module base are queried once, when the reader is created, and reused
/// for every read after that.
pub struct Reader<A> {
    accessor: A,
    pointer_width: PointerWidth,
    module_base: Va,
}

impl<A> Reader<A>
where
    A: MemoryAccessor,
{
    pub fn new(accessor: A) -> Self {
        let pointer_width = PointerWidth::from_is_64bit(accessor.is_64bit());
        // 32-bit targets store absolute addresses where 64-bit targets store rvas
        let module_base = match pointer_width {
            PointerWidth::Bits32 => Va::NULL,
            PointerWidth::Bits64 => accessor.module_base(),
        };
        Self {
            accessor,
            pointer_width,
            module_base,
        }
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    pub fn module_base(&self) -> Va {
        self.module_base
    }

    pub fn is_readable(&self, address: Va) -> bool {
        self.accessor.is_readable(address)
    }

    fn read_into(&self, address: Va, buffer: &mut [u8]) -> Result<Option<()>> {
        match self.accessor.read_bytes(address, buffer) {
            Ok(()) => Ok(Some(())),
            Err(Error::Unreadable(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Reads a `T` at `address`, or `None` if the memory is not readable.
    pub fn read<T>(&self, address: Va) -> Result<Option<T>>
    where
        T: AnyBitPattern,
    {
        let mut buffer: SmallVec<[u8; 32]> = SmallVec::from_elem(0, mem::size_of::<T>());
        Ok(self
            .read_into(address, &mut buffer)?
            .map(|()| bytemuck::pod_read_unaligned(&buffer)))
    }

    /// Reads a pointer sized for the target.
    pub fn read_pointer(&self, address: Va) -> Result<Option<Va>> {
        let mut buffer = [0u8; 8];
        let buffer = match self.pointer_width {
            PointerWidth::Bits32 => &mut buffer[..4],
            PointerWidth::Bits64 => &mut buffer[..],
        };
        Ok(self.read_into(address, buffer)?.map(|()| {
            match self.pointer_width {
                PointerWidth::Bits32 => LittleEndian::read_u32(buffer).into(),
                PointerWidth::Bits64 => LittleEndian::read_u64(buffer).into(),
            }
        }))
    }

    /// Reads units up to, not including, the first null unit.
    ///
    /// Returns `None` if not even the first unit is readable. A string that runs into
    /// unreadable memory is cut off there.
    pub fn read_c_string(&self, address: Va, encoding: StringEncoding) -> Result<Option<BString>> {
        match encoding {
            StringEncoding::Narrow => self.read_narrow_string(address),
            StringEncoding::Wide => Ok(self.read_wide_string(address)?.map(|units| {
                String::from_utf16_lossy(&units).into_bytes().into()
            })),
        }
    }

    fn read_narrow_string(&self, address: Va) -> Result<Option<BString>> {
        let mut result = Vec::new();
        let mut chunk = [0u8; STRING_CHUNK];
        while result.len() < MAX_STRING_UNITS {
            let Some(cursor) = address.checked_add(result.len() as u64) else {
                break;
            };
            if self.read_into(cursor, &mut chunk)?.is_some() {
                if let Some(end) = memchr::memchr(0, &chunk) {
                    result.extend_from_slice(&chunk[..end]);
                    return Ok(Some(result.into()));
                }
                result.extend_from_slice(&chunk);
                continue;
            }

            // the chunk straddles the end of readable memory, so finish a byte at a time
            loop {
                let Some(cursor) = address.checked_add(result.len() as u64) else {
                    break;
                };
                match self.read::<u8>(cursor)? {
                    Some(0) => return Ok(Some(result.into())),
                    Some(byte) if result.len() < MAX_STRING_UNITS => result.push(byte),
                    Some(_) => break,
                    None if result.is_empty() => return Ok(None),
                    None => break,
                }
            }
            break;
        }
        result.truncate(MAX_STRING_UNITS);
        Ok(Some(result.into()))
    }

    fn read_wide_string(&self, address: Va) -> Result<Option<Vec<u16>>> {
        let mut result = Vec::new();
        while result.len() < MAX_STRING_UNITS {
            let Some(cursor) = address.checked_add(result.len() as u64 * 2) else {
                break;
            };
            match self.read::<[u8; 2]>(cursor)? {
                Some(unit) => match LittleEndian::read_u16(&unit) {
                    0 => break,
                    unit => result.push(unit),
                },
                None if result.is_empty() => return Ok(None),
                None => break,
            }
        }
        Ok(Some(result))
    }
}
