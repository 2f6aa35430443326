//! Custom macros for reducing code repetition in backdropd

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(ipc_server::start(state, tx).await, "run IPC server");
/// ```
#[macro_export]
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        if let Err(e) = $expr {
            log::error!("Failed to {}: {}", $context, e);
        }
    };
}

/// Validate an enum-like string value
///
/// # Example
/// ```ignore
/// validate_enum!(trigger, "complete-clip", "fixed-duration");
/// validate_enum!(easing, "linear", "ease-in", "ease-out", "ease-in-out");
/// ```
#[macro_export]
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+) => {
        match $value {
            $($variant)|+ => Ok(()),
            _ => anyhow::bail!("Invalid value: {} (expected one of: {})", $value, [$($variant),+].join(", ")),
        }
    };
}

/// Ensure a numeric setting satisfies a bound
///
/// # Example
/// ```ignore
/// ensure_setting!(self.preload.max_resident >= 2, "preload.max_resident", self.preload.max_resident);
/// ```
#[macro_export]
macro_rules! ensure_setting {
    ($cond:expr, $name:expr, $value:expr) => {
        if !($cond) {
            anyhow::bail!(
                "Invalid {}: {} (must satisfy {})",
                $name,
                $value,
                stringify!($cond)
            );
        }
    };
}
