//! Synthetic module images for tests.

use crate::{
    abi,
    demangle::Flags,
    image::{
        ImageMemory,
        ImageSection,
    },
    memory::Reader,
    primitives::{
        PointerWidth,
        Va,
    },
};
use bstr::{
    BStr,
    ByteSlice as _,
};
use bytemuck::NoUninit;
use std::mem;

pub(crate) type ClassId = usize;

/// Undecorates `.?AV`/`.?AU` names of non-template types, e.g. `.?AVWidget@App@@`.
pub(crate) fn demangler(decorated_name: &BStr, _: Flags) -> Option<String> {
    let name = decorated_name.to_str().ok()?;
    let name = name
        .strip_prefix(".?AV")
        .or_else(|| name.strip_prefix(".?AU"))?
        .strip_suffix("@@")?;
    let mut segments: Vec<_> = name.split('@').collect();
    if segments.iter().any(|x| x.is_empty()) {
        return None;
    }
    segments.reverse();
    Some(segments.join("::"))
}

struct ClassLayout {
    decorated_name: String,
    bases: Vec<ClassId>,
}

pub(crate) struct ImageBuilder {
    is_64bit: bool,
    classes: Vec<ClassLayout>,
}

impl ImageBuilder {
    pub(crate) fn new(is_64bit: bool) -> Self {
        Self {
            is_64bit,
            classes: Vec::new(),
        }
    }

    /// Declares a polymorphic class deriving from `bases`, in declaration order.
    pub(crate) fn class(&mut self, decorated_name: &str, bases: &[ClassId]) -> ClassId {
        self.classes.push(ClassLayout {
            decorated_name: decorated_name.to_owned(),
            bases: bases.to_vec(),
        });
        self.classes.len() - 1
    }

    /// The class followed by its bases, flattened in pre-order.
    fn flatten(&self, id: ClassId) -> Vec<ClassId> {
        let mut result = vec![id];
        for &base in &self.classes[id].bases {
            result.extend(self.flatten(base));
        }
        result
    }

    pub(crate) fn finish(self) -> TestImage {
        let width = PointerWidth::from_is_64bit(self.is_64bit);
        let pointer = width.bytes();
        let base = if self.is_64bit {
            Va::from(0x1_4000_0000_u64)
        } else {
            Va::from(0x40_0000_u32)
        };

        let mut image = TestImage {
            bytes: Vec::new(),
            base,
            is_64bit: self.is_64bit,
            type_info_vftable: Va::NULL,
            type_descriptors: Vec::new(),
            base_class_descriptors: Vec::new(),
            base_class_arrays: Vec::new(),
            locators: Vec::new(),
            vftables: Vec::new(),
            objects: Vec::new(),
        };
        image.type_info_vftable = image.alloc(pointer * 2);

        let arrays: Vec<_> = (0..self.classes.len()).map(|id| self.flatten(id)).collect();

        for class in &self.classes {
            let name = class.decorated_name.as_bytes();
            let location = image.alloc(abi::type_descriptor::name(width) + name.len() as u64 + 1);
            image.put_pointer(location, image.type_info_vftable);
            let name_location = location.get() + abi::type_descriptor::name(width);
            image.put_bytes(Va::from(name_location), name);
            image.type_descriptors.push(location);
        }

        let hierarchies: Vec<_> = (0..self.classes.len())
            .map(|_| image.alloc(mem::size_of::<abi::ClassHierarchyDescriptor>() as u64))
            .collect();

        for (id, array) in arrays.iter().enumerate() {
            let location = image.alloc(mem::size_of::<abi::BaseClassDescriptor>() as u64);
            let descriptor = abi::BaseClassDescriptor {
                pTypeDescriptor: image.rva(image.type_descriptors[id]),
                numContainedBases: (array.len() - 1) as u32,
                r#where: abi::PMD {
                    mdisp: 0,
                    pdisp: -1,
                    vdisp: 0,
                },
                attributes: 0x40,
                pClassDescriptor: image.rva(hierarchies[id]),
            };
            image.put(location, descriptor);
            image.base_class_descriptors.push(location);
        }

        for (id, array) in arrays.iter().enumerate() {
            let array_location = image.alloc(4 * array.len() as u64);
            for (i, &entry) in array.iter().enumerate() {
                let rva = image.rva(image.base_class_descriptors[entry]);
                image.put(Va::from(array_location.get() + 4 * i as u64), rva);
            }
            let hierarchy = abi::ClassHierarchyDescriptor {
                signature: 0,
                attributes: u32::from(array.len() > 2),
                numBaseClasses: array.len() as u32,
                pBaseClassArray: image.rva(array_location),
            };
            image.put(hierarchies[id], hierarchy);
            image.base_class_arrays.push(array_location);
        }

        for id in 0..self.classes.len() {
            let locator_size = mem::size_of::<abi::CompleteObjectLocator>() as u64;
            let location = image.alloc(locator_size + 4);
            let locator = abi::CompleteObjectLocator {
                signature: u32::from(self.is_64bit),
                offset: 0,
                cdOffset: 0,
                pTypeDescriptor: image.rva(image.type_descriptors[id]),
                pClassDescriptor: image.rva(hierarchies[id]),
            };
            image.put(location, locator);
            if self.is_64bit {
                let this = image.rva(location);
                image.put(Va::from(location.get() + locator_size), this);
            }
            image.locators.push(location);

            let meta = image.alloc(pointer * 3);
            image.put_pointer(meta, location);
            let vftable = Va::from(meta.get() + pointer);
            image.put_pointer(vftable, Va::from(0xC0DE_u32));
            image.vftables.push(vftable);

            let object = image.alloc(pointer * 2);
            image.put_pointer(object, vftable);
            image.objects.push(object);
        }

        image
    }
}

pub(crate) struct TestImage {
    bytes: Vec<u8>,
    base: Va,
    is_64bit: bool,
    type_info_vftable: Va,
    type_descriptors: Vec<Va>,
    base_class_descriptors: Vec<Va>,
    base_class_arrays: Vec<Va>,
    locators: Vec<Va>,
    vftables: Vec<Va>,
    objects: Vec<Va>,
}

impl TestImage {
    fn alloc(&mut self, size: u64) -> Va {
        // keep every record 8 byte aligned, and never hand out the module base itself
        let offset = (self.bytes.len().max(0x10) + 7) & !7;
        self.bytes.resize(offset + size as usize, 0);
        Va::from(self.base.get() + offset as u64)
    }

    fn offset(&self, address: Va) -> usize {
        (address.get() - self.base.get()) as usize
    }

    fn rva(&self, address: Va) -> crate::primitives::Rva {
        if self.is_64bit {
            ((address.get() - self.base.get()) as u32).into()
        } else {
            (address.get() as u32).into()
        }
    }

    fn put_bytes(&mut self, address: Va, bytes: &[u8]) {
        let offset = self.offset(address);
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn put<T>(&mut self, address: Va, value: T)
    where
        T: NoUninit,
    {
        self.put_bytes(address, bytemuck::bytes_of(&value));
    }

    fn put_pointer(&mut self, address: Va, value: Va) {
        if self.is_64bit {
            self.put(address, value.get());
        } else {
            self.put(address, value.get() as u32);
        }
    }

    /// Overwrites the sub element count of a class's own base class descriptor.
    pub(crate) fn set_sub_element_count(&mut self, id: ClassId, count: u32) {
        let location = self.base_class_descriptors[id].get()
            + mem::offset_of!(abi::BaseClassDescriptor, numContainedBases) as u64;
        self.put(Va::from(location), count);
    }

    /// Points slot `index` of a class's base class array at the descriptor of `target`.
    pub(crate) fn set_base_class(&mut self, id: ClassId, index: usize, target: ClassId) {
        let entry = self.base_class_arrays[id].get() + 4 * index as u64;
        let rva = self.rva(self.base_class_descriptors[target]);
        self.put(Va::from(entry), rva);
    }

    pub(crate) fn reader(&self) -> Reader<ImageMemory<'_>> {
        Reader::new(self.memory())
    }

    pub(crate) fn memory(&self) -> ImageMemory<'_> {
        ImageMemory::from_sections(
            self.base,
            self.is_64bit,
            vec![ImageSection::new(self.base, &self.bytes)],
        )
    }

    pub(crate) fn base(&self) -> Va {
        self.base
    }

    pub(crate) fn type_info_vftable(&self) -> Va {
        self.type_info_vftable
    }

    pub(crate) fn type_descriptor(&self, id: ClassId) -> Va {
        self.type_descriptors[id]
    }

    pub(crate) fn locator(&self, id: ClassId) -> Va {
        self.locators[id]
    }

    pub(crate) fn vftable(&self, id: ClassId) -> Va {
        self.vftables[id]
    }

    pub(crate) fn object(&self, id: ClassId) -> Va {
        self.objects[id]
    }
}
