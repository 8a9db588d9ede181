use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use signal_hook::consts::signal::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::flag;
#[cfg(unix)]
use signal_hook::low_level::unregister;
#[cfg(unix)]
use signal_hook::SigId;

/// Process-wide shutdown state. Set once, never cleared; every long-running
/// loop (acceptor, sessions, heartbeat) holds a clone and checks it.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    inner: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    fn shared(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner)
    }
}

/// SIGINT/SIGTERM hooks. The signal context performs only the atomic flag
/// store; joining and cleanup run on the main flow once the accept loop
/// observes the flag.
pub struct ShutdownHooks {
    flag: ShutdownFlag,
    #[cfg(unix)]
    sig_ids: Vec<SigId>,
}

impl ShutdownHooks {
    pub fn install() -> io::Result<Self> {
        let flag = ShutdownFlag::new();

        #[cfg(unix)]
        {
            let id_int = flag::register(SIGINT, flag.shared())?;
            let id_term = flag::register(SIGTERM, flag.shared())?;
            return Ok(Self {
                flag,
                sig_ids: vec![id_int, id_term],
            });
        }

        #[cfg(not(unix))]
        {
            Ok(Self { flag })
        }
    }

    pub fn flag(&self) -> ShutdownFlag {
        self.flag.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.is_set()
    }
}

impl Drop for ShutdownHooks {
    fn drop(&mut self) {
        #[cfg(unix)]
        for id in self.sig_ids.drain(..) {
            unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ShutdownFlag, ShutdownHooks};

    #[test]
    fn flag_starts_clear_and_is_monotonic() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());

        flag.set();
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn clones_observe_the_same_state() {
        let flag = ShutdownFlag::new();
        let observer = flag.clone();

        flag.set();
        assert!(observer.is_set());
    }

    #[test]
    fn hooks_install_and_expose_untriggered_flag() {
        let hooks = ShutdownHooks::install().expect("hooks should install");
        assert!(!hooks.is_triggered());
        assert!(!hooks.flag().is_set());
    }
}
