//! Identifier generation.

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates an opaque session handle.
///
/// Session ids carry no meaning for the remote system; they only key the
/// local registry.
#[must_use]
pub fn generate_session_id() -> String {
    generate_uuid().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
