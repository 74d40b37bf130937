// Logging macros shared by every crate in the workspace.
//
// Thin wrappers over the `log` facade so call sites read the same
// everywhere and the backend is picked once by the binary.

#[macro_export]
macro_rules! sys_debug {
    ($($arg:tt)*) => {
        $crate::__log::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! sys_info {
    ($($arg:tt)*) => {
        $crate::__log::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! sys_warn {
    ($($arg:tt)*) => {
        $crate::__log::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! sys_error {
    ($($arg:tt)*) => {
        $crate::__log::error!($($arg)*)
    };
}
