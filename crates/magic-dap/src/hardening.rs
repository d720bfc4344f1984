use std::any::Any;
use std::panic::PanicHookInfo;
use std::sync::{Arc, OnceLock};

use magic_config::{init_tracing_with_config, DapConfig};

use crate::dap::codec::sanitize_json_error_message;

/// Receives a short user-facing description of a panic.
pub type PanicNotifier = Arc<dyn Fn(&str) + Send + Sync + 'static>;

static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Initialize structured logging and install a global panic hook for the adapter process.
///
/// Request handlers and the execution thread still isolate panics locally
/// (`catch_unwind`); the hook only records what escaped.
pub fn init(config: &DapConfig, notifier: PanicNotifier) {
    init_tracing_with_config(config);
    install_panic_hook(config.logging.include_backtrace, notifier);
}

fn install_panic_hook(include_backtrace: bool, notifier: PanicNotifier) {
    PANIC_HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // Release builds do not echo payloads to stderr.
            if cfg!(debug_assertions) {
                previous(info);
            }

            let message = sanitize_json_error_message(&panic_message(info));
            let location = info.location().map(|loc| loc.to_string());
            let backtrace = include_backtrace
                .then(|| std::backtrace::Backtrace::force_capture().to_string());

            tracing::error!(
                target: "magic.panic",
                message = %message,
                location = %location.as_deref().unwrap_or("<unknown>"),
                backtrace = backtrace.as_deref(),
                "panic captured"
            );

            notifier(&format!("magic-dap encountered an internal error: {message}"));
        }));
    });
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    payload_message(info.payload()).unwrap_or_else(|| "panic payload (non-string)".to_owned())
}

/// The text of a `panic!` payload, if it carries one.
pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_owned())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}
