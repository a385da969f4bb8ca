use once_cell::sync::OnceCell;
use slog::{Drain, Logger};
use slog_stdlog::StdLog;

/// Key under which the library's components identify themselves in log
/// records. The pool container, the heap loader and the SQL catalog
/// resolver each log as their own module, so one pool open can be followed
/// phase by phase.
pub const COMPONENT_KEY: &str = "bbp_module";

static ROOT_LOGGER: OnceCell<Logger> = OnceCell::new();

/// The library-wide root logger. Records are forwarded to the `log` crate
/// unless the embedding application installs its own drain before the
/// first pool is opened.
pub struct GlobalLogger;

impl GlobalLogger {
    /// Get the root logger.
    pub fn get() -> &'static Logger {
        ROOT_LOGGER.get_or_init(|| Logger::root(StdLog.fuse(), o!()))
    }

    /// A child logger for one named component of the library; everything it
    /// emits carries the component under [`COMPONENT_KEY`].
    pub fn component(name: &'static str) -> Logger {
        GlobalLogger::get().new(o!(COMPONENT_KEY => name))
    }

    /// Installs the root logger. Can only be called once, before anything
    /// has logged; returns the rejected logger when a root is already in
    /// place.
    pub fn setup(root: Logger) -> Result<(), Logger> { ROOT_LOGGER.set(root) }
}
