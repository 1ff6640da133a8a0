use std::sync::Once;

use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Level from `USBADC_LOG`, then `RUST_LOG`, defaulting to `info`.
pub fn env_level() -> LevelFilter {
    std::env::var("USBADC_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Initialize logging for Rust binaries (stderr formatter).
///
/// `verbosity` raises the level above the environment default: 1 = debug, 2+ = trace.
pub fn init_rust_logging(verbosity: u8) {
    let level = match verbosity {
        0 => env_level(),
        1 => env_level().max(LevelFilter::Debug),
        _ => LevelFilter::Trace,
    };
    RUST_LOG_ONCE.call_once(|| {
        env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(false)
            .init();
    });
}

#[cfg(feature = "python")]
pub use python_bridge::{init_python_logging, set_python_log_level};

#[cfg(feature = "python")]
mod python_bridge {
    use std::sync::Once;

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;
    use pyo3::types::PyModule;

    use super::env_level;

    static PY_LOG_ONCE: Once = Once::new();
    static PY_LOGGER: OnceCell<&'static PyLogger> = OnceCell::new();

    /// Forwards `log` records to `logging.getLogger(<target>)` in Python.
    ///
    /// The Python side decides what is shown; the Rust side only drops records
    /// above `log::max_level()`.
    struct PyLogger {
        logging_mod: Py<PyModule>,
    }

    fn py_level(level: Level) -> u32 {
        match level {
            Level::Error => 40,
            Level::Warn => 30,
            Level::Info => 20,
            Level::Debug => 10,
            Level::Trace => 5,
        }
    }

    impl PyLogger {
        fn emit(&self, py: Python<'_>, record: &Record) -> PyResult<()> {
            let name = record.target().replace("::", ".");
            let logger = self
                .logging_mod
                .bind(py)
                .call_method1("getLogger", (name,))?;
            logger.call_method1(
                "log",
                (py_level(record.level()), format!("{}", record.args())),
            )?;
            Ok(())
        }
    }

    impl Log for PyLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            Python::attach(|py| {
                if let Err(e) = self.emit(py, record) {
                    e.restore(py);
                }
            });
        }

        fn flush(&self) {}
    }

    /// Route Rust logs into Python's `logging`. Safe to call more than once.
    pub fn init_python_logging(py: Python<'_>) -> PyResult<()> {
        let logging = py.import("logging")?;
        PY_LOG_ONCE.call_once(|| {
            let logger: &'static PyLogger = Box::leak(Box::new(PyLogger {
                logging_mod: logging.unbind(),
            }));
            if log::set_logger(logger).is_ok() {
                log::set_max_level(env_level());
                let _ = PY_LOGGER.set(logger);
            }
        });
        Ok(())
    }

    /// Set the most verbose level forwarded to Python.
    pub fn set_python_log_level(level: &str) -> PyResult<()> {
        let filter = level.parse::<LevelFilter>().map_err(|_| {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("invalid log level: {level}"))
        })?;
        if PY_LOGGER.get().is_some() {
            log::set_max_level(filter);
        }
        Ok(())
    }
}
