use crate::{
    error::{
        Error,
        Result,
    },
    memory::MemoryAccessor,
    primitives::Va,
};
use byteorder::{
    ByteOrder as _,
    LittleEndian,
};
use log::debug;
use pelite::image::{
    IMAGE_DOS_SIGNATURE,
    IMAGE_NT_HEADERS_SIGNATURE,
    IMAGE_NT_OPTIONAL_HDR32_MAGIC,
    IMAGE_NT_OPTIONAL_HDR64_MAGIC,
};
use std::{
    fs::{
        self,
        File,
    },
    io::{
        self,
        Read as _,
    },
    os::unix::fs::FileExt as _,
    path::{
        Path,
        PathBuf,
    },
};

/// Bytes read from the start of a mapping to recognise a pe image.
const HEADER_SIZE: u64 = 0x1000;

struct Region {
    start: u64,
    end: u64,
    readable: bool,
    path: Option<PathBuf>,
}

impl Region {
    /// Parses one line of `/proc/<pid>/maps`.
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let permissions = fields.next()?;
        let path = fields.nth(3).map(PathBuf::from);
        Some(Self {
            start: u64::from_str_radix(start, 16).ok()?,
            end: u64::from_str_radix(end, 16).ok()?,
            readable: permissions.starts_with('r'),
            path,
        })
    }

    fn contains(&self, address: u64, len: u64) -> bool {
        address >= self.start && address.checked_add(len).is_some_and(|end| end <= self.end)
    }

    fn is_executable_image(&self) -> bool {
        self.readable
            && self
                .path
                .as_deref()
                .and_then(Path::extension)
                .is_some_and(|x| x.eq_ignore_ascii_case("exe"))
    }
}

/// Whether the pe image starting with `header` is 64-bit, or `None` if it is not a pe image.
fn pe_is_64bit(header: &[u8]) -> Option<bool> {
    if LittleEndian::read_u16(header.get(..2)?) != IMAGE_DOS_SIGNATURE {
        return None;
    }
    let nt_headers = usize::try_from(LittleEndian::read_u32(header.get(0x3C..0x40)?)).ok()?;
    let signature = header.get(nt_headers..nt_headers.checked_add(4)?)?;
    if LittleEndian::read_u32(signature) != IMAGE_NT_HEADERS_SIGNATURE {
        return None;
    }
    // the optional header follows the signature and the 20 byte file header
    let magic = nt_headers.checked_add(24)?;
    match LittleEndian::read_u16(header.get(magic..magic.checked_add(2)?)?) {
        IMAGE_NT_OPTIONAL_HDR64_MAGIC => Some(true),
        IMAGE_NT_OPTIONAL_HDR32_MAGIC => Some(false),
        _ => None,
    }
}

/// The lowest mapped `.exe` pe image, with its bitness.
///
/// Under wine the process executable is the elf preloader, while the module carrying the RTTI is
/// the pe image it mapped.
fn find_pe_module<F>(regions: &[Region], read_header: F) -> Option<(Va, bool)>
where
    F: Fn(&Region) -> Option<Vec<u8>>,
{
    let mut candidates: Vec<_> = regions
        .iter()
        .filter(|region| region.is_executable_image())
        .collect();
    candidates.sort_by_key(|region| region.start);
    candidates.into_iter().find_map(|region| {
        let is_64bit = pe_is_64bit(&read_header(region)?)?;
        Some((Va::from(region.start), is_64bit))
    })
}

/// A [`MemoryAccessor`] over a live process, through procfs.
pub struct ProcessMemory {
    pid: u32,
    memory: File,
    regions: Vec<Region>,
    is_64bit: bool,
    module_base: Va,
}

impl ProcessMemory {
    /// Opens the address space of `pid`.
    ///
    /// The module base defaults to the lowest mapped `.exe` pe image, as loaded by wine, and
    /// otherwise to the lowest mapping of the process executable.
    pub fn open(pid: u32, module_base: Option<Va>) -> Result<Self> {
        let proc = PathBuf::from(format!("/proc/{pid}"));
        let memory = File::open(proc.join("mem"))?;
        let regions: Vec<_> = fs::read_to_string(proc.join("maps"))?
            .lines()
            .filter_map(Region::parse)
            .collect();

        let pe_module = find_pe_module(&regions, |region| {
            let len = HEADER_SIZE.min(region.end.saturating_sub(region.start));
            let mut header = vec![0u8; usize::try_from(len).ok()?];
            memory.read_exact_at(&mut header, region.start).ok()?;
            Some(header)
        });

        let (is_64bit, default_base) = match pe_module {
            Some((base, is_64bit)) => {
                debug!("found pe module at {base}");
                (is_64bit, base)
            }
            None => {
                let mut header = [0u8; 5];
                File::open(proc.join("exe"))?.read_exact(&mut header)?;
                // EI_CLASS of the elf header, ELFCLASS64
                let is_64bit = header[..4] == *b"\x7FELF" && header[4] == 2;
                let exe = fs::read_link(proc.join("exe")).ok();
                let base = regions
                    .iter()
                    .filter(|region| exe.is_some() && region.path == exe)
                    .map(|region| region.start)
                    .min()
                    .unwrap_or_default();
                (is_64bit, Va::from(base))
            }
        };
        let module_base = module_base.unwrap_or(default_base);
        debug!(
            "opened process {pid}: {} regions, {}-bit, module base {module_base}",
            regions.len(),
            if is_64bit { 64 } else { 32 }
        );

        Ok(Self {
            pid,
            memory,
            regions,
            is_64bit,
            module_base,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn is_mapped(&self, address: Va, len: usize) -> bool {
        self.regions
            .iter()
            .any(|region| region.readable && region.contains(address.get(), len as u64))
    }
}

impl MemoryAccessor for ProcessMemory {
    fn is_readable(&self, address: Va) -> bool {
        self.is_mapped(address, 1)
    }

    fn read_bytes(&self, address: Va, buffer: &mut [u8]) -> Result<()> {
        if !self.is_mapped(address, buffer.len()) {
            return Err(Error::Unreadable(address));
        }
        self.memory
            .read_exact_at(buffer, address.get())
            .map_err(|source| match source.kind() {
                // the mapping went away since the maps were read
                io::ErrorKind::UnexpectedEof => Error::Unreadable(address),
                _ => Error::ReadFailure {
                    address,
                    len: buffer.len(),
                    source,
                },
            })
    }

    fn is_64bit(&self) -> bool {
        self.is_64bit
    }

    fn module_base(&self) -> Va {
        self.module_base
    }
}
