use core::cell::Cell;

use critical_section::Mutex;

/// A cell providing atomic load/store of `Copy` values of any size
///
/// Values larger than the native atomic width are protected by a critical
/// section, so accesses are safe from both thread and interrupt context. The
/// critical sections are short: a single copy of the value.
pub struct AtomicCell<T> {
    inner: Mutex<Cell<T>>,
}

impl<T: Copy> AtomicCell<T> {
    /// Create a new AtomicCell holding `value`
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Read the current value
    pub fn load(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Store a new value
    pub fn store(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value))
    }

    /// Store a new value, returning the previous one
    pub fn swap(&self, value: T) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).replace(value))
    }
}

impl<T: Copy + Default> AtomicCell<T> {
    /// Replace the value with its default, returning the previous value
    pub fn take(&self) -> T {
        self.swap(T::default())
    }
}

impl<T: Copy + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("AtomicCell").field(&self.load()).finish()
    }
}
