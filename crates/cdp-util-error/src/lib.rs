pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;

/// Compact, single-line error formatting for logging.
///
/// `{:#}` on most `std::error::Error` impls prints every `source()` on its
/// own line; `fmt_compact` joins the chain with `: ` instead so a `tracing`
/// field stays on one line.
pub trait FmtCompact {
    fn fmt_compact(&self) -> FmtCompactDisplay<'_>;
}

impl<E> FmtCompact for E
where
    E: std::error::Error,
{
    fn fmt_compact(&self) -> FmtCompactDisplay<'_> {
        FmtCompactDisplay(self)
    }
}

pub struct FmtCompactDisplay<'a>(&'a dyn std::error::Error);

impl std::fmt::Display for FmtCompactDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
