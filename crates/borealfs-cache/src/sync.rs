//! Transfer completion anchors.

use std::sync::{Arc, Condvar, Mutex};

/// A synchronization anchor attached to a page before a transfer is
/// submitted; signalled with the transfer result exactly once when the
/// transfer completes.
pub struct SyncAnchor {
    result: Mutex<Option<i32>>,
    cv: Condvar,
}

impl SyncAnchor {
    /// Creates an unsignalled anchor.
    pub fn new() -> Arc<SyncAnchor> {
        Arc::new(SyncAnchor {
            result: Mutex::new(None),
            cv: Condvar::new(),
        })
    }

    /// Records the transfer result and wakes waiters. Signalling twice
    /// is a contract violation.
    pub fn note(&self, result: i32) {
        let mut slot = self.result.lock().unwrap();
        if slot.is_some() {
            drop(slot);
            panic!("sync anchor signalled twice");
        }
        *slot = Some(result);
        self.cv.notify_all();
    }

    /// Blocks until the transfer completes, returning its result code.
    pub fn wait(&self) -> i32 {
        let mut slot = self.result.lock().unwrap();
        loop {
            match *slot {
                Some(result) => return result,
                None => slot = self.cv.wait(slot).unwrap(),
            }
        }
    }

    /// The result if already signalled.
    pub fn try_result(&self) -> Option<i32> {
        *self.result.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_note_then_wait() {
        let anchor = SyncAnchor::new();
        anchor.note(-5);
        assert_eq!(anchor.wait(), -5);
        assert_eq!(anchor.try_result(), Some(-5));
    }

    #[test]
    fn test_wait_blocks_until_noted() {
        let anchor = SyncAnchor::new();
        let waiter = {
            let anchor = Arc::clone(&anchor);
            thread::spawn(move || anchor.wait())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        anchor.note(0);
        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    #[should_panic(expected = "twice")]
    fn test_double_note_panics() {
        let anchor = SyncAnchor::new();
        anchor.note(0);
        anchor.note(0);
    }
}
