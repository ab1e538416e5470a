#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod abi;
pub mod demangle;
pub mod error;
pub mod factory;
pub mod header;
pub mod image;
mod logging;
pub mod memory;
pub mod primitives;
#[cfg(target_os = "linux")]
pub mod process;
pub mod rtti;
pub mod syntax;
#[cfg(test)]
mod testing;

pub use crate::{
    demangle::{
        Demangler,
        Undname,
    },
    error::{
        Error,
        Result,
    },
    factory::RttiFactory,
    image::ImageMemory,
    memory::{
        MemoryAccessor,
        Reader,
    },
    primitives::Va,
    syntax::Class,
};
use anyhow::Context as _;
use log::info;
use std::{
    fmt::Write as _,
    path::PathBuf,
};

/// What to do with the class found at an address.
pub struct Probe {
    pub address: Va,
    /// `address` points at a vftable rather than at an object.
    pub is_vftable: bool,
    /// Report the decorated name as well.
    pub mangled: bool,
    pub export: Option<PathBuf>,
    pub include_base_classes: bool,
    pub overwrite: bool,
}

/// Looks up the RTTI of the class at `probe.address` and returns a report on it, exporting its
/// headers if asked to.
pub fn analyse<A>(accessor: A, probe: &Probe) -> anyhow::Result<String>
where
    A: MemoryAccessor,
{
    let factory = RttiFactory::new(accessor);
    let address = probe.address;
    let vftable = if probe.is_vftable {
        address
    } else {
        factory
            .vftable_from_object(address)
            .with_context(|| format!("failed to read the object at {address}"))?
            .with_context(|| format!("no class found at {address}"))?
    };
    let locator = factory
        .runtime_info_from_vftable(vftable)
        .with_context(|| format!("failed to read the RTTI of the vftable at {vftable}"))?
        .with_context(|| format!("no class found at {address}"))?;

    let mut report = String::new();
    if probe.is_vftable {
        writeln!(report, "Vftable at {address} belongs to a class with RTTI.")?;
    } else {
        writeln!(
            report,
            "Object at {address} is a class with a vftable at {vftable}."
        )?;
    }
    if probe.mangled {
        writeln!(report, "{}", factory.type_name(&locator, false, None)?)?;
    }
    writeln!(report)?;
    report.push_str(&factory.class_info(&locator)?);

    if let Some(directory) = &probe.export {
        info!("exporting headers...");
        let class = factory
            .class_syntax(&locator)?
            .context("failed to rebuild the class hierarchy")?;
        let written = header::export_headers(
            &class,
            directory,
            probe.include_base_classes,
            probe.overwrite,
        )
        .with_context(|| format!("failed to export headers to: {directory:?}"))?;
        writeln!(
            report,
            "\nExported {} classes to {directory:?}.",
            written.len()
        )?;
    }
    Ok(report)
}
