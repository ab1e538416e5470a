//! Views over the msvc RTTI records of a target.
//!
//! ```text
//! vftable[-1] -> CompleteObjectLocator
//!                  |- TypeDescriptor
//!                  `- ClassHierarchyDescriptor
//!                       `- BaseClassDescriptor[numBaseClasses]
//!                            |- TypeDescriptor
//!                            `- ClassHierarchyDescriptor
//! ```
//!
//! Every view is decoded on demand from target memory and never cached. Unreadable memory at any
//! step yields `None` for that branch.

use crate::{
    abi,
    demangle::{
        default_flags,
        Demangler,
        Flags,
    },
    error::Result,
    memory::{
        MemoryAccessor,
        Reader,
        StringEncoding,
    },
    primitives::{
        Rva,
        Va,
    },
    syntax::Class,
};
use bstr::{
    BString,
    ByteSlice as _,
};
use log::debug;

/// Resolves a module-relative offset read from an RTTI record.
fn resolve<A>(reader: &Reader<A>, rva: Rva) -> Option<Va>
where
    A: MemoryAccessor,
{
    Va::resolve(reader.module_base(), rva)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeDescriptor {
    pub location: Va,
    pub vftable: Va,
    pub runtime_ref: Va,
    pub decorated_name: BString,
}

impl TypeDescriptor {
    pub fn read<A>(reader: &Reader<A>, location: Va) -> Result<Option<Self>>
    where
        A: MemoryAccessor,
    {
        let width = reader.pointer_width();
        let field = |offset: u64| location.checked_add(offset);
        let (Some(vftable), Some(runtime_ref), Some(name)) = (
            field(abi::type_descriptor::pVFTable(width)),
            field(abi::type_descriptor::spare(width)),
            field(abi::type_descriptor::name(width)),
        ) else {
            return Ok(None);
        };
        let Some(vftable) = reader.read_pointer(vftable)? else {
            return Ok(None);
        };
        let Some(runtime_ref) = reader.read_pointer(runtime_ref)? else {
            return Ok(None);
        };
        let Some(decorated_name) = reader.read_c_string(name, StringEncoding::Narrow)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            location,
            vftable,
            runtime_ref,
            decorated_name,
        }))
    }

    /// The declared name of the type.
    ///
    /// An empty string means the name could not be recovered. With `name_only`, the namespaces
    /// are stripped from the demangled name.
    pub fn name<D>(&self, demangler: &D, name_only: bool, demangle: bool, flags: Flags) -> String
    where
        D: Demangler + ?Sized,
    {
        if self.decorated_name.is_empty() {
            return String::new();
        }
        if !demangle {
            return self.decorated_name.to_str_lossy().into_owned();
        }
        let Some(name) = demangler.undecorate(self.decorated_name.as_bstr(), flags) else {
            debug!(
                "failed to demangle type descriptor at {}: {}",
                self.location,
                self.decorated_name.to_str_lossy()
            );
            return String::new();
        };
        if name_only {
            Class::parse(&name).name
        } else {
            name
        }
    }

    pub fn namespaces<D>(&self, demangler: &D, flags: Flags) -> Vec<String>
    where
        D: Demangler + ?Sized,
    {
        Class::parse(&self.name(demangler, false, true, flags)).namespaces
    }

    /// ``class N `RTTI Type Descriptor'``
    #[must_use]
    pub fn describe(name: &str) -> String {
        format!("class {name} `RTTI Type Descriptor'")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClassHierarchyDescriptor {
    pub location: Va,
    pub signature: u32,
    pub attributes: u32,
    pub base_class_count: u32,
    pub base_class_array: Rva,
}

impl ClassHierarchyDescriptor {
    pub fn read<A>(reader: &Reader<A>, location: Va) -> Result<Option<Self>>
    where
        A: MemoryAccessor,
    {
        Ok(reader
            .read::<abi::ClassHierarchyDescriptor>(location)?
            .map(|raw| Self {
                location,
                signature: raw.signature,
                attributes: raw.attributes,
                base_class_count: raw.numBaseClasses,
                base_class_array: raw.pBaseClassArray,
            }))
    }

    /// The base class descriptor in slot `index` of the base class array.
    ///
    /// Slot 0 describes the class itself. Returns `None` for `index >= base_class_count`.
    pub fn base_class<A>(&self, reader: &Reader<A>, index: u32) -> Result<Option<BaseClassDescriptor>>
    where
        A: MemoryAccessor,
    {
        if index >= self.base_class_count {
            return Ok(None);
        }
        let Some(entry) = resolve(reader, self.base_class_array)
            .and_then(|array| array.checked_add(u64::from(index) * abi::BASE_CLASS_ARRAY_ENTRY))
        else {
            return Ok(None);
        };
        let Some(descriptor) = reader.read::<Rva>(entry)? else {
            return Ok(None);
        };
        match resolve(reader, descriptor) {
            Some(location) => BaseClassDescriptor::read(reader, location),
            None => Ok(None),
        }
    }

    /// Every readable base class descriptor, in array order.
    pub fn base_classes<A>(&self, reader: &Reader<A>) -> Result<Vec<BaseClassDescriptor>>
    where
        A: MemoryAccessor,
    {
        let mut result = Vec::new();
        for index in 0..self.base_class_count {
            match self.base_class(reader, index)? {
                Some(base) => result.push(base),
                None => break,
            }
        }
        Ok(result)
    }

    /// ``N::`RTTI Class Hierarchy Descriptor'``
    #[must_use]
    pub fn describe(name: &str) -> String {
        format!("{name}::`RTTI Class Hierarchy Descriptor'")
    }

    /// ``N::`RTTI Base Class Array'``
    #[must_use]
    pub fn describe_base_class_array(name: &str) -> String {
        format!("{name}::`RTTI Base Class Array'")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BaseClassDescriptor {
    pub location: Va,
    pub type_descriptor: Rva,
    /// Number of entries following this one in the enclosing base class array that belong to
    /// this base's own bases.
    pub sub_element_count: u32,
    pub member_displacement: i32,
    pub vftable_displacement: i32,
    pub displacement_within_vftable: i32,
    pub attributes: u32,
    pub class_hierarchy_descriptor: Rva,
}

impl BaseClassDescriptor {
    pub fn read<A>(reader: &Reader<A>, location: Va) -> Result<Option<Self>>
    where
        A: MemoryAccessor,
    {
        Ok(reader
            .read::<abi::BaseClassDescriptor>(location)?
            .map(|raw| Self {
                location,
                type_descriptor: raw.pTypeDescriptor,
                sub_element_count: raw.numContainedBases,
                member_displacement: raw.r#where.mdisp,
                vftable_displacement: raw.r#where.pdisp,
                displacement_within_vftable: raw.r#where.vdisp,
                attributes: raw.attributes,
                class_hierarchy_descriptor: raw.pClassDescriptor,
            }))
    }

    pub fn type_descriptor<A>(&self, reader: &Reader<A>) -> Result<Option<TypeDescriptor>>
    where
        A: MemoryAccessor,
    {
        match resolve(reader, self.type_descriptor) {
            Some(location) => TypeDescriptor::read(reader, location),
            None => Ok(None),
        }
    }

    pub fn class_hierarchy_descriptor<A>(
        &self,
        reader: &Reader<A>,
    ) -> Result<Option<ClassHierarchyDescriptor>>
    where
        A: MemoryAccessor,
    {
        match resolve(reader, self.class_hierarchy_descriptor) {
            Some(location) => ClassHierarchyDescriptor::read(reader, location),
            None => Ok(None),
        }
    }

    /// ``N::`RTTI Base Class Descriptor at (m, p, v, attributes)'``
    #[must_use]
    pub fn describe(&self, name: &str) -> String {
        format!(
            "{name}::`RTTI Base Class Descriptor at ({}, {}, {}, {})'",
            self.member_displacement,
            self.vftable_displacement,
            self.displacement_within_vftable,
            self.attributes
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompleteObjectLocator {
    pub location: Va,
    pub signature: u32,
    pub vftable_offset: u32,
    pub ctor_displacement_offset: u32,
    pub type_descriptor: Rva,
    pub class_hierarchy_descriptor: Rva,
}

impl CompleteObjectLocator {
    /// Reads the record at `location` without validating it.
    pub fn read<A>(reader: &Reader<A>, location: Va) -> Result<Option<Self>>
    where
        A: MemoryAccessor,
    {
        Ok(reader
            .read::<abi::CompleteObjectLocator>(location)?
            .map(|raw| Self {
                location,
                signature: raw.signature,
                vftable_offset: raw.offset,
                ctor_displacement_offset: raw.cdOffset,
                type_descriptor: raw.pTypeDescriptor,
                class_hierarchy_descriptor: raw.pClassDescriptor,
            }))
    }

    /// Reads the record at `location`, returning it only if it names a type.
    pub fn decode<A, D>(reader: &Reader<A>, demangler: &D, location: Va) -> Result<Option<Self>>
    where
        A: MemoryAccessor,
        D: Demangler + ?Sized,
    {
        if !reader.is_readable(location) {
            return Ok(None);
        }
        let Some(locator) = Self::read(reader, location)? else {
            return Ok(None);
        };
        if locator.is_valid(reader, demangler)? {
            Ok(Some(locator))
        } else {
            debug!("rejected complete object locator at {location}");
            Ok(None)
        }
    }

    pub fn is_valid<A, D>(&self, reader: &Reader<A>, demangler: &D) -> Result<bool>
    where
        A: MemoryAccessor,
        D: Demangler + ?Sized,
    {
        Ok(self
            .type_descriptor(reader)?
            .map(|type_descriptor| {
                !type_descriptor
                    .name(demangler, false, true, default_flags())
                    .trim()
                    .is_empty()
            })
            .unwrap_or(false))
    }

    pub fn type_descriptor<A>(&self, reader: &Reader<A>) -> Result<Option<TypeDescriptor>>
    where
        A: MemoryAccessor,
    {
        match resolve(reader, self.type_descriptor) {
            Some(location) => TypeDescriptor::read(reader, location),
            None => Ok(None),
        }
    }

    pub fn class_hierarchy_descriptor<A>(
        &self,
        reader: &Reader<A>,
    ) -> Result<Option<ClassHierarchyDescriptor>>
    where
        A: MemoryAccessor,
    {
        match resolve(reader, self.class_hierarchy_descriptor) {
            Some(location) => ClassHierarchyDescriptor::read(reader, location),
            None => Ok(None),
        }
    }

    /// ``const N::`RTTI Complete Object Locator'``
    #[must_use]
    pub fn describe(name: &str) -> String {
        format!("const {name}::`RTTI Complete Object Locator'")
    }
}
