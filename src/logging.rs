/// Collapses a burst of similar warnings into one log entry.
///
/// The first warning is kept verbatim, the rest are only counted. Everything is logged when the
/// spam is dropped.
pub(crate) struct WarningSpam<'why> {
    why: &'why str,
    warning: Option<String>,
    count: usize,
}

impl<'why> WarningSpam<'why> {
    pub(crate) fn new(why: &'why str) -> Self {
        Self {
            why,
            warning: None,
            count: 0,
        }
    }

    pub(crate) fn warn<F>(&mut self, warning: F)
    where
        F: FnOnce() -> String,
    {
        if self.warning.is_none() {
            self.warning = Some(warning());
        }
        self.count += 1;
    }
}

impl Drop for WarningSpam<'_> {
    fn drop(&mut self) {
        if let Some(warning) = &self.warning {
            log::warn!("{warning}");
            if self.count > 1 {
                log::warn!("and {} others...", self.count - 1);
            }
            log::warn!("^^ {}", self.why);
        }
    }
}
