//! Thin wrappers around `tracing` so call sites never spell the crate name
//! directly — matches the macro-indirection pattern used by the engine this
//! crate's layering was learned from, letting logging be silenced without
//! touching call sites.

macro_rules! trace {
    ($($arg:tt)+) => { ::tracing::trace!($($arg)+) }
}

macro_rules! debug {
    ($($arg:tt)+) => { ::tracing::debug!($($arg)+) }
}

macro_rules! warn {
    ($($arg:tt)+) => { ::tracing::warn!($($arg)+) }
}

#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)+) => { ::tracing::error!($($arg)+) }
}

pub(crate) use {debug, error, trace, warn};
