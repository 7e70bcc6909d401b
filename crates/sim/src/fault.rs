use std::sync::atomic::{AtomicU32, Ordering};

/// Counter of commands that should fault on purpose.
#[derive(Debug, Default)]
pub(crate) struct FaultInjector {
    pending: AtomicU32,
}

impl FaultInjector {
    pub(crate) fn fail_next(&self, commands: u32) {
        self.pending.store(commands, Ordering::SeqCst);
    }

    /// Consume one pending fault, returning whether the current command fails.
    pub(crate) fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| pending.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_are_consumed_one_per_command() {
        let faults = FaultInjector::default();
        assert!(!faults.take());
        faults.fail_next(2);
        assert!(faults.take());
        assert!(faults.take());
        assert!(!faults.take());
    }
}
