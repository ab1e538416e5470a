use anyhow::Context as _;
use clap::{
    Args,
    Parser,
    Subcommand,
};
use class_analyser::{
    ImageMemory,
    Probe,
    Va,
};
use env_logger::Env;
use std::{
    fs,
    path::PathBuf,
};

fn file_validator(path: &str) -> Result<PathBuf, &'static str> {
    let path: PathBuf = path.into();
    if !path.exists() {
        Err("input file does not exist")
    } else if !path.is_file() {
        Err("input file is not a file")
    } else {
        Ok(path)
    }
}

fn directory_validator(path: &str) -> Result<PathBuf, &'static str> {
    let path: PathBuf = path.into();
    if path.exists() && !path.is_dir() {
        Err("output path is not a directory")
    } else {
        Ok(path)
    }
}

fn address_validator(address: &str) -> Result<Va, String> {
    address
        .parse()
        .map_err(|err| format!("invalid address `{address}`: {err}"))
}

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    target: Target,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand)]
enum Target {
    /// Probe the memory of a running process
    #[cfg(target_os = "linux")]
    Process {
        /// The id of the process to read from
        pid: u32,

        /// The address to probe, in hex (0x...) or decimal
        #[arg(value_parser = address_validator)]
        address: Va,

        /// The load address of the module the RTTI belongs to
        #[arg(long, value_parser = address_validator)]
        module_base: Option<Va>,
    },

    /// Probe a PE image, mapped at its preferred image base
    Image {
        /// The PE file to read from
        #[arg(value_parser = file_validator)]
        file: PathBuf,

        /// The address to probe, in hex (0x...) or decimal
        #[arg(value_parser = address_validator)]
        address: Va,
    },
}

#[derive(Args)]
struct Options {
    /// The address points at a vftable instead of an object
    #[arg(long, global = true)]
    vftable: bool,

    /// Also print the decorated name of the class
    #[arg(long, global = true)]
    mangled: bool,

    /// Export the class to C++ headers in this directory
    #[arg(long, global = true, value_parser = directory_validator)]
    export: Option<PathBuf>,

    /// Only export the class itself, not the classes it derives from
    #[arg(long, global = true)]
    no_base_classes: bool,

    /// Replace headers that already exist
    #[arg(long, global = true)]
    overwrite: bool,
}

impl Options {
    fn probe(self, address: Va) -> Probe {
        Probe {
            address,
            is_vftable: self.vftable,
            mangled: self.mangled,
            export: self.export,
            include_base_classes: !self.no_base_classes,
            overwrite: self.overwrite,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let env = Env::default()
        .filter_or("CLASS_ANALYSER_LOG", "info")
        .write_style_or("CLASS_ANALYSER_LOG_STYLE", "always");
    env_logger::init_from_env(env);
    let cli = Cli::parse();
    let report = match cli.target {
        #[cfg(target_os = "linux")]
        Target::Process {
            pid,
            address,
            module_base,
        } => {
            let memory = class_analyser::process::ProcessMemory::open(pid, module_base)
                .with_context(|| format!("failed to open process {pid}"))?;
            class_analyser::analyse(memory, &cli.options.probe(address))
                .with_context(|| format!("in process {pid}"))?
        }
        Target::Image { file, address } => {
            let image = fs::read(&file)
                .with_context(|| format!("failed to read input file into memory: {file:?}"))?;
            let memory = ImageMemory::try_from_pe(&image)
                .with_context(|| format!("failed to read input file as a pe file: {file:?}"))?;
            class_analyser::analyse(memory, &cli.options.probe(address))
                .with_context(|| format!("in image {file:?}"))?
        }
    };
    print!("{report}");
    Ok(())
}
