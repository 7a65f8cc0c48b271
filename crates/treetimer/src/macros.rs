//! Scoped regions and the instrumentation macro.

use std::ops::{Deref, DerefMut};

use crate::error::TimerError;
use crate::thread::ThreadTimers;

/// RAII guard that stops its region on drop.
///
/// Derefs to the underlying [`ThreadTimers`], so nested regions can be opened
/// through the guard.
#[derive(Debug)]
pub struct Region<'h, 'lib> {
    timers: &'h mut ThreadTimers<'lib>,
    name: &'h str,
    armed: bool,
}

impl<'lib> ThreadTimers<'lib> {
    /// Start `name` and stop it when the returned guard is dropped.
    ///
    /// A failed start is reported as usual and the guard then does nothing,
    /// except after a stack overflow, where the matching stop is still owed.
    #[inline]
    pub fn region<'h>(&'h mut self, name: &'h str) -> Region<'h, 'lib> {
        let armed = match self.start(name) {
            Ok(()) | Err(TimerError::StackOverflow { .. }) => true,
            Err(_) => false,
        };
        Region {
            timers: self,
            name,
            armed,
        }
    }
}

impl<'lib> Deref for Region<'_, 'lib> {
    type Target = ThreadTimers<'lib>;

    fn deref(&self) -> &Self::Target {
        self.timers
    }
}

impl DerefMut for Region<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.timers
    }
}

impl Drop for Region<'_, '_> {
    #[inline]
    fn drop(&mut self) {
        if self.armed {
            // Failures were already counted and logged.
            let _ = self.timers.stop(self.name);
        }
    }
}

/// Time the rest of the enclosing scope as region `$name`.
///
/// Rebinds `$timers` to a [`Region`] guard that derefs to the handle, so the
/// same identifier keeps working for nested regions. When the `profiling`
/// feature is disabled, this macro expands to nothing.
///
/// # Examples
///
/// ```ignore
/// use treetimer::region;
///
/// fn solve(timers: &mut treetimer::ThreadTimers<'_>) {
///     region!(timers, "solve");
///     assemble(&mut timers);
/// } // "solve" stopped here
/// ```
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! region {
    ($timers:ident, $name:expr) => {
        #[allow(unused_mut)]
        let mut $timers = $timers.region($name);
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! region {
    ($timers:ident, $name:expr) => {};
}

#[cfg(test)]
mod tests {
    use crate::clock::ClockSource;
    use crate::context::Library;
    use crate::options::Setting;

    fn library() -> Library {
        let mut lib = Library::new();
        lib.set_clock_source(ClockSource::ClockGettime).unwrap();
        lib.initialize().unwrap();
        lib
    }

    #[test]
    fn guard_stops_on_drop() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        {
            let mut outer = t.region("outer");
            {
                let _inner = outer.region("inner");
            }
            assert!(outer.state().find("outer").unwrap().onflg());
            assert_eq!(outer.state().find("inner").unwrap().count(), 1);
        }
        let state = t.state();
        assert_eq!(state.find("outer").unwrap().count(), 1);
        assert_eq!(state.depth(), 0);
        assert_eq!(lib.num_errors(), 0);
    }

    #[test]
    fn overflowed_guard_still_pairs_its_stop() {
        let mut lib = Library::new();
        lib.set_option(Setting::MaxStackDepth(2)).unwrap();
        lib.initialize().unwrap();
        let mut t = lib.attach().unwrap();
        {
            let mut a = t.region("a");
            {
                let _b = a.region("b");
            }
            assert!(a.state().find("a").unwrap().onflg());
        }
        assert_eq!(t.state().find("a").unwrap().count(), 1);
        assert_eq!(lib.num_errors(), 1);
    }

    #[cfg(feature = "profiling")]
    #[test]
    fn macro_rebinds_handle() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        {
            crate::region!(t, "scoped");
            assert!(t.state().find("scoped").unwrap().onflg());
        }
        assert_eq!(t.state().find("scoped").unwrap().count(), 1);
    }
}
