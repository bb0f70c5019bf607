//! Initiator tie-break.

use common::types::ParticipantId;

/// Decide whether `local` originates the negotiation with `remote`.
///
/// The participant with the lexicographically smaller identifier initiates.
/// Both ends evaluate this independently and always agree, so two initial
/// offers never cross. A participant never initiates towards itself.
#[must_use]
pub fn is_initiator(local: &ParticipantId, remote: &ParticipantId) -> bool {
    local < remote
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_smaller_id_initiates() {
        let a = ParticipantId::from("111");
        let b = ParticipantId::from("222");

        assert!(is_initiator(&a, &b));
        assert!(!is_initiator(&b, &a));
    }

    #[test]
    fn test_exactly_one_side_initiates() {
        let ids = ["111", "222", "alice", "bob", "Bob", "10", "9", "", "zz-top"];

        for a in &ids {
            for b in &ids {
                if a == b {
                    continue;
                }
                let a = ParticipantId::from(*a);
                let b = ParticipantId::from(*b);
                assert_ne!(
                    is_initiator(&a, &b),
                    is_initiator(&b, &a),
                    "exactly one of {a} / {b} must initiate"
                );
            }
        }
    }

    #[test]
    fn test_never_initiates_towards_self() {
        let a = ParticipantId::from("111");
        assert!(!is_initiator(&a, &a.clone()));
    }
}
