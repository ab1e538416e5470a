use crate::{
    error::{
        Error,
        Result,
    },
    syntax::Class,
};
use log::{
    debug,
    info,
};
use std::{
    collections::HashSet,
    fmt::Write as _,
    fs::{
        self,
        OpenOptions,
    },
    io::{
        self,
        Write as _,
    },
    path::{
        Path,
        PathBuf,
    },
};

const TAB: &str = "    ";

/// How msvc spells the enclosing scope of a type in an unnamed namespace.
const ANONYMOUS_NAMESPACE: &str = "`anonymous namespace'";

/// Makes a namespace or class name usable as a path component.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .filter_map(|x| match x {
            ' ' | '`' | '\'' => None,
            '<' | '>' | ',' | ':' | '(' | ')' | '*' | '&' | '/' | '\\' | '|' | '?' | '"' => {
                Some('_')
            }
            _ => Some(x),
        })
        .collect()
}

/// Makes a scope or class name usable as a C++ identifier.
fn identifier(component: &str) -> String {
    let mut result: String = sanitize(component)
        .chars()
        .map(|x| if x.is_ascii_alphanumeric() { x } else { '_' })
        .collect();
    if result.is_empty() || result.starts_with(|x: char| x.is_ascii_digit()) {
        result.insert(0, '_');
    }
    result
}

/// The scopes `namespaces` declare, `None` standing for an unnamed namespace.
///
/// Scopes that are not identifiers, such as an enclosing class template, are declared as
/// namespaces of their sanitised name.
fn scopes(namespaces: &[String]) -> Vec<Option<String>> {
    namespaces
        .iter()
        .map(|x| (x != ANONYMOUS_NAMESPACE).then(|| identifier(x)))
        .collect()
}

/// `class`, as named from the global scope of a header.
fn declared_name(class: &Class) -> String {
    let mut result = String::new();
    // members of an unnamed namespace are reachable through the enclosing scope
    for scope in scopes(&class.namespaces).into_iter().flatten() {
        result.push_str(&scope);
        result.push_str("::");
    }
    if class.is_template_argument {
        // arguments may be builtin types, which sanitising would mangle
        result.push_str(&class.name);
    } else {
        result.push_str(&identifier(&class.name));
    }
    if !class.template_arguments.is_empty() {
        let arguments: Vec<_> = class.template_arguments.iter().map(declared_name).collect();
        let _ = write!(result, "<{}>", arguments.join(", "));
    }
    result
}

/// Path of the header for `class`, relative to the export root.
#[must_use]
pub fn header_path(class: &Class) -> PathBuf {
    let mut path: PathBuf = class.namespaces.iter().map(|x| sanitize(x)).collect();
    path.push(format!("{}.h", sanitize(&class.name)));
    path
}

/// The name `base` is referred to by from within the namespaces of `class`.
fn base_name(class: &Class, base: &Class) -> String {
    if class.namespaces.starts_with(&base.namespaces) {
        declared_name(&Class {
            namespaces: Vec::new(),
            ..base.clone()
        })
    } else {
        declared_name(base)
    }
}

/// Renders a header declaring `class`.
///
/// Direct bases are included by path, so their own bases come in through their headers.
#[must_use]
pub fn render(class: &Class) -> String {
    let mut result = String::from("#pragma once\n\n");

    if !class.base_classes.is_empty() {
        for base in &class.base_classes {
            let _ = writeln!(result, "#include <{}>", header_path(base).display());
        }
        result.push('\n');
    }

    // consecutive named scopes share one block, an unnamed namespace gets its own
    let mut blocks: Vec<Option<Vec<String>>> = Vec::new();
    for scope in scopes(&class.namespaces) {
        if let (Some(scope), Some(Some(block))) = (&scope, blocks.last_mut()) {
            block.push(scope.clone());
            continue;
        }
        blocks.push(scope.map(|x| vec![x]));
    }
    for (depth, block) in blocks.iter().enumerate() {
        let indent = TAB.repeat(depth);
        match block {
            Some(block) => {
                let _ = write!(result, "{indent}namespace {}\n{indent}{{\n", block.join("::"));
            }
            None => {
                let _ = write!(result, "{indent}namespace\n{indent}{{\n");
            }
        }
    }

    let tab = TAB.repeat(blocks.len());
    match class.template_arguments.len() {
        0 => (),
        1 => {
            let _ = writeln!(result, "{tab}template<typename T>");
        }
        len => {
            let parameters: Vec<_> = (0..len).map(|i| format!("typename T{i}")).collect();
            let _ = writeln!(result, "{tab}template<{}>", parameters.join(", "));
        }
    }

    let _ = write!(result, "{tab}class {}", identifier(&class.name));
    if !class.base_classes.is_empty() {
        let bases: Vec<_> = class
            .base_classes
            .iter()
            .map(|base| format!("public {}", base_name(class, base)))
            .collect();
        let _ = write!(result, " : {}", bases.join(", "));
    }
    let _ = write!(result, "\n{tab}{{\n\n{tab}}};\n");

    for depth in (0..blocks.len()).rev() {
        let _ = writeln!(result, "{}}}", TAB.repeat(depth));
    }
    result
}

fn write_header(path: &Path, contents: &str, overwrite: bool) -> Result<()> {
    if overwrite {
        fs::write(path, contents)?;
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_owned()),
            _ => err.into(),
        })?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

/// Collects the headers an export writes, each path once, in the order they are written.
fn plan<'a>(
    class: &'a Class,
    root: &Path,
    include_base_classes: bool,
    headers: &mut Vec<(PathBuf, &'a Class)>,
    seen: &mut HashSet<PathBuf>,
) {
    let path = root.join(header_path(class));
    if seen.insert(path.clone()) {
        headers.push((path, class));
    } else {
        debug!("skipping {path:?}, it was already exported");
    }

    if include_base_classes {
        for base in &class.base_classes {
            plan(base, root, include_base_classes, headers, seen);
        }
    }
}

/// Writes the header for `class`, and for every class it derives from if `include_base_classes`,
/// under `root/<namespaces>/<Name>.h`.
///
/// Without `overwrite`, any existing header stops the export with [`Error::AlreadyExists`] before
/// a single file is written. Returns the paths written, in the order they were written.
pub fn export_headers(
    class: &Class,
    root: &Path,
    include_base_classes: bool,
    overwrite: bool,
) -> Result<Vec<PathBuf>> {
    let mut headers = Vec::new();
    plan(
        class,
        root,
        include_base_classes,
        &mut headers,
        &mut HashSet::new(),
    );
    if !overwrite {
        if let Some((path, _)) = headers.iter().find(|(path, _)| path.exists()) {
            return Err(Error::AlreadyExists(path.clone()));
        }
    }

    let mut written = Vec::with_capacity(headers.len());
    for (path, class) in headers {
        if let Some(directory) = path.parent() {
            fs::create_dir_all(directory)?;
        }
        write_header(&path, &render(class), overwrite)?;
        info!("exported {} to {path:?}", class.qualified_name());
        written.push(path);
    }
    Ok(written)
}
