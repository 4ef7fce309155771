//! Reference-counted process-wide native runtimes
//!
//! Native SDKs want exactly one initialize/destroy pair per process. Every
//! source and sink that touches a runtime holds a [`LibraryLease`]; the first
//! lease initializes the runtime and dropping the last one destroys it, so an
//! endpoint being torn down can never pull the library out from under another
//! endpoint that still uses it.

use crate::error::NativeError;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

/// A native library with global init/teardown
pub trait NativeRuntime: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    fn initialize(&self) -> Result<(), NativeError>;

    fn destroy(&self);
}

/// Shared owner of one native runtime
pub struct SharedLibrary<L: NativeRuntime + ?Sized> {
    library: Arc<L>,
    users: Mutex<usize>,
}

impl<L: NativeRuntime + ?Sized> SharedLibrary<L> {
    pub fn new(library: Arc<L>) -> Arc<Self> {
        Arc::new(Self {
            library,
            users: Mutex::new(0),
        })
    }

    /// Register one more dependent, initializing the runtime if it is the first
    ///
    /// A failed initialization leaves the count untouched.
    pub fn acquire(self: &Arc<Self>) -> Result<LibraryLease<L>, NativeError> {
        let mut users = self.users.lock();

        if *users == 0 {
            self.library.initialize()?;
            log::info!("{} runtime initialized", self.library.name());
        }
        *users += 1;

        Ok(LibraryLease {
            shared: Arc::clone(self),
        })
    }

    /// Number of live leases
    pub fn users(&self) -> usize {
        *self.users.lock()
    }

    /// Access the runtime without holding a lease (diagnostics only)
    pub fn library(&self) -> &Arc<L> {
        &self.library
    }

    fn release(&self) {
        let mut users = self.users.lock();
        *users = users.saturating_sub(1);

        if *users == 0 {
            self.library.destroy();
            log::info!("{} runtime destroyed", self.library.name());
        }
    }
}

/// Proof that the runtime stays initialized while this value lives
pub struct LibraryLease<L: NativeRuntime + ?Sized> {
    shared: Arc<SharedLibrary<L>>,
}

impl<L: NativeRuntime + ?Sized> LibraryLease<L> {
    pub fn shared(&self) -> &Arc<SharedLibrary<L>> {
        &self.shared
    }
}

impl<L: NativeRuntime + ?Sized> Deref for LibraryLease<L> {
    type Target = L;

    fn deref(&self) -> &L {
        &self.shared.library
    }
}

impl<L: NativeRuntime + ?Sized> Clone for LibraryLease<L> {
    fn clone(&self) -> Self {
        *self.shared.users.lock() += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<L: NativeRuntime + ?Sized> Drop for LibraryLease<L> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRuntime {
        inits: AtomicUsize,
        destroys: AtomicUsize,
        fail: AtomicBool,
    }

    impl NativeRuntime for CountingRuntime {
        fn name(&self) -> &str {
            "counting"
        }

        fn initialize(&self) -> Result<(), NativeError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NativeError::LibraryUnavailable("disabled".into()));
            }
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_last_lease_destroys() {
        let runtime = Arc::new(CountingRuntime::default());
        let shared = SharedLibrary::new(Arc::clone(&runtime));

        let a = shared.acquire().unwrap();
        let b = shared.acquire().unwrap();
        assert_eq!(shared.users(), 2);
        assert_eq!(runtime.inits.load(Ordering::SeqCst), 1);

        drop(a);
        assert_eq!(runtime.destroys.load(Ordering::SeqCst), 0);

        drop(b);
        assert_eq!(shared.users(), 0);
        assert_eq!(runtime.destroys.load(Ordering::SeqCst), 1);

        // A new generation initializes again
        let _c = shared.acquire().unwrap();
        assert_eq!(runtime.inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cloned_lease_counts() {
        let runtime = Arc::new(CountingRuntime::default());
        let shared = SharedLibrary::new(Arc::clone(&runtime));

        let a = shared.acquire().unwrap();
        let b = a.clone();
        drop(a);
        assert_eq!(shared.users(), 1);
        drop(b);
        assert_eq!(runtime.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_initialize_keeps_count() {
        let runtime = Arc::new(CountingRuntime::default());
        runtime.fail.store(true, Ordering::SeqCst);
        let shared = SharedLibrary::new(Arc::clone(&runtime));

        assert!(shared.acquire().is_err());
        assert_eq!(shared.users(), 0);
        assert_eq!(runtime.destroys.load(Ordering::SeqCst), 0);
    }
}
