use bstr::{
    BStr,
    BString,
    ByteSlice as _,
};
pub use undname::Flags;

/// Converts decorated names into their display form.
pub trait Demangler {
    /// Returns `None` if `decorated_name` can not be undecorated.
    fn undecorate(&self, decorated_name: &BStr, flags: Flags) -> Option<String>;
}

impl<F> Demangler for F
where
    F: Fn(&BStr, Flags) -> Option<String>,
{
    fn undecorate(&self, decorated_name: &BStr, flags: Flags) -> Option<String> {
        self(decorated_name, flags)
    }
}

/// The msvc demangler.
#[derive(Clone, Copy, Debug, Default)]
pub struct Undname;

impl Demangler for Undname {
    fn undecorate(&self, decorated_name: &BStr, flags: Flags) -> Option<String> {
        let mut buffer = BString::default();
        undname::demangle_into(decorated_name, flags, &mut buffer).ok()?;
        let result = buffer.to_str_lossy();
        let result = result.trim();
        // type descriptor names may still carry their elaborated type specifier
        let result = ["class ", "struct ", "union ", "enum "]
            .iter()
            .find_map(|keyword| result.strip_prefix(keyword))
            .unwrap_or(result)
            .trim();
        if result.is_empty() {
            None
        } else {
            Some(result.to_owned())
        }
    }
}

/// The flags used when none are given.
#[must_use]
pub fn default_flags() -> Flags {
    Flags::NAME_ONLY
}
