use crate::{
    error::{
        Error,
        Result,
    },
    memory::MemoryAccessor,
    primitives::Va,
};
use log::debug;
use pelite::{
    pe32::{
        self,
        Pe as _,
    },
    pe64::{
        self,
        Pe as _,
    },
};

/// One contiguous, readable run of target memory.
pub struct ImageSection<'image> {
    pub(crate) virtual_address: Va,
    pub(crate) bytes: &'image [u8],
}

impl<'image> ImageSection<'image> {
    pub fn new(virtual_address: Va, bytes: &'image [u8]) -> Self {
        Self {
            virtual_address,
            bytes,
        }
    }

    fn address_to_offset(&self, address: Va) -> Option<usize> {
        let offset: usize = address
            .get()
            .checked_sub(self.virtual_address.get())?
            .try_into()
            .ok()?;
        (offset < self.bytes.len()).then_some(offset)
    }

    fn get(&self, address: Va, len: usize) -> Option<&'image [u8]> {
        let offset = self.address_to_offset(address)?;
        self.bytes.get(offset..offset.checked_add(len)?)
    }
}

/// A [`MemoryAccessor`] over the sections of a module image.
///
/// Sections are laid out at their virtual addresses, so the image reads the same way the loaded
/// module would.
pub struct ImageMemory<'image> {
    image_base: Va,
    is_64bit: bool,
    sections: Vec<ImageSection<'image>>,
}

macro_rules! locate_sections {
    ($pe:expr) => {{
        let pe = $pe;
        let image_base = Va::from(pe.optional_header().ImageBase);
        let sections = pe
            .section_headers()
            .iter()
            .filter_map(|section_header| {
                let bytes = pe.get_section_bytes(section_header).ok()?;
                let virtual_address =
                    Va::resolve(image_base, section_header.VirtualAddress.into())?;
                debug!("mapped section at {virtual_address} ({:#X} bytes)", bytes.len());
                Some(ImageSection::new(virtual_address, bytes))
            })
            .collect();
        (image_base, sections)
    }};
}

impl<'image> ImageMemory<'image> {
    pub fn from_sections(
        image_base: Va,
        is_64bit: bool,
        sections: Vec<ImageSection<'image>>,
    ) -> Self {
        Self {
            image_base,
            is_64bit,
            sections,
        }
    }

    /// Maps the sections of a pe32 or pe64 file at its preferred image base.
    pub fn try_from_pe(image: &'image [u8]) -> Result<Self> {
        match pe64::PeFile::from_bytes(image) {
            Ok(pe) => {
                let (image_base, sections) = locate_sections!(pe);
                Ok(Self::from_sections(image_base, true, sections))
            }
            Err(pelite::Error::PeMagic) => {
                let pe = pe32::PeFile::from_bytes(image)?;
                let (image_base, sections) = locate_sections!(pe);
                Ok(Self::from_sections(image_base, false, sections))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get(&self, address: Va, len: usize) -> Option<&'image [u8]> {
        self.sections
            .iter()
            .find_map(|section| section.get(address, len))
    }
}

impl MemoryAccessor for ImageMemory<'_> {
    fn is_readable(&self, address: Va) -> bool {
        self.get(address, 1).is_some()
    }

    fn read_bytes(&self, address: Va, buffer: &mut [u8]) -> Result<()> {
        let bytes = self
            .get(address, buffer.len())
            .ok_or(Error::Unreadable(address))?;
        buffer.copy_from_slice(bytes);
        Ok(())
    }

    fn is_64bit(&self) -> bool {
        self.is_64bit
    }

    fn module_base(&self) -> Va {
        self.image_base
    }
}
