use crate::{
    demangle::{
        default_flags,
        Demangler,
        Flags,
        Undname,
    },
    error::Result,
    memory::{
        MemoryAccessor,
        Reader,
    },
    primitives::Va,
    rtti::{
        ClassHierarchyDescriptor,
        CompleteObjectLocator,
        TypeDescriptor,
    },
    syntax::Class,
};
use log::debug;
use std::fmt::Write as _;

/// Finds and decodes the RTTI of objects in a target.
pub struct RttiFactory<A, D = Undname> {
    reader: Reader<A>,
    demangler: D,
}

impl<A> RttiFactory<A>
where
    A: MemoryAccessor,
{
    pub fn new(accessor: A) -> Self {
        Self::with_demangler(accessor, Undname)
    }
}

impl<A, D> RttiFactory<A, D>
where
    A: MemoryAccessor,
    D: Demangler,
{
    pub fn with_demangler(accessor: A, demangler: D) -> Self {
        Self {
            reader: Reader::new(accessor),
            demangler,
        }
    }

    pub fn reader(&self) -> &Reader<A> {
        &self.reader
    }

    pub fn demangler(&self) -> &D {
        &self.demangler
    }

    /// The vftable of the object at `object`, read from its first member.
    pub fn vftable_from_object(&self, object: Va) -> Result<Option<Va>> {
        self.reader.read_pointer(object)
    }

    /// The complete object locator address stored right before the vftable.
    pub fn locate_complete_object_locator(&self, vftable: Va) -> Result<Option<Va>> {
        if vftable.is_null() {
            return Ok(None);
        }
        let Some(slot) = vftable.checked_sub(self.reader.pointer_width().bytes()) else {
            return Ok(None);
        };
        if !self.reader.is_readable(slot) {
            return Ok(None);
        }
        self.reader.read_pointer(slot)
    }

    pub fn runtime_info_from_vftable(&self, vftable: Va) -> Result<Option<CompleteObjectLocator>> {
        let Some(location) = self.locate_complete_object_locator(vftable)? else {
            debug!("no complete object locator before vftable {vftable}");
            return Ok(None);
        };
        CompleteObjectLocator::decode(&self.reader, &self.demangler, location)
    }

    pub fn runtime_info_from_object(&self, object: Va) -> Result<Option<CompleteObjectLocator>> {
        match self.vftable_from_object(object)? {
            Some(vftable) => self.runtime_info_from_vftable(vftable),
            None => {
                debug!("object at {object} is not readable");
                Ok(None)
            }
        }
    }

    /// The name of the object's class, or an empty string if it has no RTTI.
    pub fn class_name(&self, object: Va, demangle: bool, flags: Option<Flags>) -> Result<String> {
        let Some(locator) = self.runtime_info_from_object(object)? else {
            return Ok(String::new());
        };
        self.type_name(&locator, demangle, flags)
    }

    /// The `::` separated components of the object's class name, outermost first.
    pub fn class_namespaces(&self, object: Va) -> Result<Vec<String>> {
        Ok(self
            .class_name(object, true, None)?
            .split("::")
            .filter(|x| !x.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// The name of the type a locator describes, or an empty string if it can not be read.
    pub fn type_name(
        &self,
        locator: &CompleteObjectLocator,
        demangle: bool,
        flags: Option<Flags>,
    ) -> Result<String> {
        Ok(locator
            .type_descriptor(&self.reader)?
            .map(|type_descriptor| {
                type_descriptor.name(
                    &self.demangler,
                    false,
                    demangle,
                    flags.unwrap_or_else(default_flags),
                )
            })
            .unwrap_or_default())
    }

    /// Rebuilds the class a locator describes, including its inheritance tree.
    pub fn class_syntax(&self, locator: &CompleteObjectLocator) -> Result<Option<Class>> {
        Class::from_complete_object_locator(&self.reader, &self.demangler, locator)
    }

    /// A report of the locator's records and the class hierarchy they describe.
    pub fn class_info(&self, locator: &CompleteObjectLocator) -> Result<String> {
        let name = self.type_name(locator, true, None)?;
        let mut result = String::new();
        let _ = writeln!(result, "{}", CompleteObjectLocator::describe(&name));
        let _ = writeln!(result, "  {}", TypeDescriptor::describe(&name));
        let _ = writeln!(result, "    {}", ClassHierarchyDescriptor::describe(&name));
        let _ = writeln!(
            result,
            "      {}",
            ClassHierarchyDescriptor::describe_base_class_array(&name)
        );
        if let Some(class) = self.class_syntax(locator)? {
            for line in class.hierarchy_info().lines() {
                let _ = writeln!(result, "        {line}");
            }
        }
        Ok(result)
    }
}
