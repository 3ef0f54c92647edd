//! The emergency-stop latch (§3 `SafetyLimits.emergencyStopLatched`, §4.2
//! "Latch semantics", §9 "Global state").
//!
//! This is the one truly process-wide mutable flag in the system. It is
//! owned by [`crate::SafetyValidator`] and exposed only through this narrow
//! read-modify interface — no other component may set or clear it directly.

use parking_lot::RwLock;

/// A one-way flag: [`Latch::trip`] always succeeds, [`Latch::clear`]
/// requires an elevated credential to have already been authenticated by
/// the caller (the validator does not itself verify credentials; that is
/// the pipeline's job before it calls `clear`).
#[derive(Debug, Default)]
pub struct Latch {
    tripped: RwLock<bool>,
}

impl Latch {
    pub fn is_tripped(&self) -> bool {
        *self.tripped.read()
    }

    /// Trips the latch. Idempotent: tripping an already-tripped latch is a
    /// no-op.
    pub fn trip(&self) {
        *self.tripped.write() = true;
    }

    /// Clears the latch. Callers must have already verified the elevated
    /// credential on the `RESET_SAFETY` command before calling this — the
    /// clearance itself is audited by the caller, not by `Latch`.
    pub fn clear(&self) {
        *self.tripped.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_is_idempotent() {
        let latch = Latch::default();
        latch.trip();
        latch.trip();
        assert!(latch.is_tripped());
    }

    #[test]
    fn clear_resets_to_untripped() {
        let latch = Latch::default();
        latch.trip();
        latch.clear();
        assert!(!latch.is_tripped());
    }
}
