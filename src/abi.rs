#![allow(non_snake_case)]

use crate::primitives::{
    PointerWidth,
    Rva,
};
use bytemuck::{
    AnyBitPattern,
    NoUninit,
};

// TypeDescriptor/_TypeDescriptor
//
// struct TypeDescriptor {
//     const void* pVFTable;
//     void* spare;
//     char name[]; // null-terminated flex array
// };
//
// Both leading fields are pointer sized, so the layout is described by offsets instead of a
// #[repr(C)] struct.
pub(crate) mod type_descriptor {
    use super::PointerWidth;

    pub(crate) fn pVFTable(_: PointerWidth) -> u64 {
        0
    }

    pub(crate) fn spare(width: PointerWidth) -> u64 {
        width.bytes()
    }

    pub(crate) fn name(width: PointerWidth) -> u64 {
        width.bytes() * 2
    }
}

#[derive(AnyBitPattern, Clone, Copy, Debug, NoUninit)]
#[repr(C)]
// _s_RTTICompleteObjectLocator/_s__RTTICompleteObjectLocator/_s__RTTICompleteObjectLocator2/_RTTICompleteObjectLocator/__RTTICompleteObjectLocator
//
// The 64-bit variant trails a `pSelf` rva, which is never read.
pub(crate) struct CompleteObjectLocator {
    pub(crate) signature: u32,
    pub(crate) offset: u32,
    pub(crate) cdOffset: u32,
    pub(crate) pTypeDescriptor: Rva,  // TypeDescriptor
    pub(crate) pClassDescriptor: Rva, // ClassHierarchyDescriptor
}

#[derive(AnyBitPattern, Clone, Copy, Debug, NoUninit)]
#[repr(C)]
// _s_RTTIClassHierarchyDescriptor/_s__RTTIClassHierarchyDescriptor/_RTTIClassHierarchyDescriptor/__RTTIClassHierarchyDescriptor
pub(crate) struct ClassHierarchyDescriptor {
    pub(crate) signature: u32,
    pub(crate) attributes: u32,
    pub(crate) numBaseClasses: u32,
    pub(crate) pBaseClassArray: Rva, // Rva[numBaseClasses] of BaseClassDescriptor
}

#[derive(AnyBitPattern, Clone, Copy, Debug, NoUninit)]
#[repr(C)]
// PMD
pub(crate) struct PMD {
    pub(crate) mdisp: i32,
    pub(crate) pdisp: i32,
    pub(crate) vdisp: i32,
}

#[derive(AnyBitPattern, Clone, Copy, Debug, NoUninit)]
#[repr(C)]
// _s_RTTIBaseClassDescriptor/_s__RTTIBaseClassDescriptor/_s__RTTIBaseClassDescriptor2/_RTTIBaseClassDescriptor/__RTTIBaseClassDescriptor
pub(crate) struct BaseClassDescriptor {
    pub(crate) pTypeDescriptor: Rva, // TypeDescriptor
    pub(crate) numContainedBases: u32,
    pub(crate) r#where: PMD,
    pub(crate) attributes: u32,
    pub(crate) pClassDescriptor: Rva, // ClassHierarchyDescriptor
}

/// Size of one entry of a base class array.
pub(crate) const BASE_CLASS_ARRAY_ENTRY: u64 = std::mem::size_of::<Rva>() as u64;
