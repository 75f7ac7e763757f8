//! Clock and identifier helpers.
//!
//! Time is read through the [`Clock`] trait so credential expiry can be
//! driven deterministically in tests.

mod clock;
mod uuid_utils;

pub use clock::{Clock, SystemClock, Timestamp};
pub use uuid_utils::{generate_session_id, generate_uuid};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
