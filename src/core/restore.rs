//! Last-ditch terminal restoration.
//!
//! A session registers a restore hook on entry and removes it on normal
//! drop. Paths that bypass `Drop` (runtime traps, termination signals,
//! panics with `panic = "abort"`) run whatever hooks are still registered.
//! Unwinding panics leave the hooks alone.
//!
//! Hooks run at most once: [`run_hooks`] takes them out of the registry.

use std::sync::{Mutex, MutexGuard, Once};

/// Identifies a registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Hook = Box<dyn FnOnce() + Send>;

struct Registry {
    next_id: u64,
    hooks: Vec<(HookId, Hook)>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    next_id: 1,
    hooks: Vec::new(),
});

fn registry() -> MutexGuard<'static, Registry> {
    // A panic while holding the lock must not disable restoration.
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Register a hook to run on abnormal exit.
pub fn register(hook: impl FnOnce() + Send + 'static) -> HookId {
    install_panic_hook();
    let mut registry = registry();
    let id = HookId(registry.next_id);
    registry.next_id += 1;
    registry.hooks.push((id, Box::new(hook)));
    id
}

/// Remove a hook without running it. Returns false if it already ran.
pub fn unregister(id: HookId) -> bool {
    let mut registry = registry();
    let before = registry.hooks.len();
    registry.hooks.retain(|(hook_id, _)| *hook_id != id);
    registry.hooks.len() != before
}

/// Run and remove every registered hook, newest first.
pub fn run_hooks() {
    let hooks = std::mem::take(&mut registry().hooks);
    for (_, hook) in hooks.into_iter().rev() {
        hook();
    }
}

/// Number of hooks currently registered.
pub fn pending() -> usize {
    registry().hooks.len()
}

/// With `panic = "abort"` no destructor runs after a panic, so the hook
/// restores the terminal itself. Unwinding panics reach the session's
/// `Drop` instead, and may be caught while the session is still live.
fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if cfg!(panic = "abort") {
                run_hooks();
            }
            previous(info);
        }));
    });
}

/// Watches termination signals for the lifetime of a session.
///
/// On SIGINT, SIGTERM or SIGHUP the terminal is restored and the process
/// exits with `128 + signo`.
#[cfg(unix)]
#[derive(Debug)]
pub struct SignalGuard {
    handle: signal_hook::iterator::Handle,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(unix)]
impl SignalGuard {
    pub fn new() -> std::io::Result<Self> {
        use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
        let handle = signals.handle();
        let thread = std::thread::Builder::new()
            .name("vipertui-signals".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    tracing::warn!("termination signal {} received, restoring terminal", signal);
                    run_hooks();
                    std::process::exit(128 + signal);
                }
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

#[cfg(unix)]
impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
