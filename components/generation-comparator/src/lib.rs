//! Generation Comparator.
//!
//! Totally orders CIB generation tuples and decides whether a candidate
//! generation advertised in a `JoinRequest` should become (or remain) the
//! round's "best" CIB source. Stateless and infallible by design: the
//! `best_cib_from`/`best_cib_gen` fields it informs live on the caller's
//! `JoinRound`, not here -- this mirrors how `address_store`'s weighted
//! selection logic stays free of the ownership question of what gets stored
//! where.

use dc_join_core::types::{Generation, NodeName};
use std::cmp::Ordering;

/// The comparator's verdict on a candidate generation. `Accept` is returned
/// both when a candidate becomes the very first best (caller had no prior
/// best) and when a later candidate loses to the existing best -- in both
/// cases the caller keeps whatever it already had (`None` or the existing
/// best) unchanged. Only `Replace` tells the caller to swap in the
/// candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Replace,
    /// The candidate's validation schema is unknown to us.
    Reject,
}

/// Lexicographic order over `(admin_epoch, epoch, num_updates)`, with a
/// missing or malformed field treated as `-1`.
pub fn compare(a: &Generation, b: &Generation) -> Ordering {
    tuple_of(a).cmp(&tuple_of(b))
}

fn tuple_of(gen: &Generation) -> (i64, i64, i64) {
    (gen.admin_epoch.unwrap_or(-1), gen.epoch.unwrap_or(-1), gen.num_updates.unwrap_or(-1))
}

/// Decides what to do with a candidate generation advertised by
/// `candidate_from`, given the round's current best (if any).
///
/// Ties are broken in favour of the local DC's own submission: when
/// `candidate_gen` is equal to `best_gen` and `candidate_from == local_name`,
/// the candidate replaces the best even though it did not strictly win the
/// comparison.
pub fn offer(
    candidate_gen: &Generation,
    candidate_from: &NodeName,
    local_name: &NodeName,
    current_best: Option<(&Generation, &NodeName)>,
) -> Decision {
    let schema_known = candidate_gen.validation_schema.is_some();

    match current_best {
        None => {
            if schema_known {
                Decision::Accept
            } else {
                Decision::Reject
            }
        }
        Some((best_gen, _best_from)) => {
            let ordering = compare(candidate_gen, best_gen);
            let supersedes = ordering == Ordering::Greater || (ordering == Ordering::Equal && candidate_from == local_name);

            if !schema_known {
                Decision::Reject
            } else if supersedes {
                Decision::Replace
            } else {
                Decision::Accept
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen(admin_epoch: i64, epoch: i64, num_updates: i64) -> Generation {
        Generation::new(admin_epoch, epoch, num_updates, "pacemaker-3.0")
    }

    #[test]
    fn compare_is_lexicographic() {
        assert_eq!(compare(&gen(0, 5, 0), &gen(0, 5, 3)), Ordering::Less);
        assert_eq!(compare(&gen(1, 0, 0), &gen(0, 999, 999)), Ordering::Greater);
        assert_eq!(compare(&gen(0, 5, 0), &gen(0, 5, 0)), Ordering::Equal);
    }

    #[test]
    fn compare_treats_missing_fields_as_minus_one() {
        let missing = Generation { admin_epoch: None, epoch: Some(5), num_updates: Some(0), validation_schema: None, cib_payload: vec![] };
        assert_eq!(compare(&missing, &gen(-1, 5, 0)), Ordering::Equal);
        assert!(compare(&missing, &gen(0, 5, 0)) == Ordering::Less);
    }

    #[test]
    fn compare_is_a_total_order() {
        let a = gen(0, 5, 0);
        let b = gen(0, 5, 3);
        let c = gen(1, 0, 0);
        assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
        assert_eq!(compare(&b, &c), compare(&c, &b).reverse());
        // transitivity: a < b < c implies a < c
        assert_eq!(compare(&a, &b), Ordering::Less);
        assert_eq!(compare(&b, &c), Ordering::Less);
        assert_eq!(compare(&a, &c), Ordering::Less);
    }

    #[test]
    fn first_offer_with_known_schema_is_accepted_as_best() {
        let a = NodeName::new("A");
        let decision = offer(&gen(0, 5, 0), &a, &a, None);
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn first_offer_with_unknown_schema_is_rejected() {
        let a = NodeName::new("A");
        let unknown = Generation { validation_schema: None, ..gen(0, 5, 0) };
        assert_eq!(offer(&unknown, &a, &a, None), Decision::Reject);
    }

    #[test]
    fn strictly_newer_generation_replaces_best() {
        let (a, b) = (NodeName::new("A"), NodeName::new("B"));
        let best = gen(0, 5, 0);
        let decision = offer(&gen(0, 5, 3), &b, &a, Some((&best, &b)));
        assert_eq!(decision, Decision::Replace);
    }

    #[test]
    fn tie_is_broken_in_favour_of_local_dc() {
        let (a, b) = (NodeName::new("A"), NodeName::new("B"));
        let best = gen(0, 5, 0);
        // B already holds the tied best; A's own (local) submission of an
        // identical generation should still replace it.
        let decision = offer(&gen(0, 5, 0), &a, &a, Some((&best, &b)));
        assert_eq!(decision, Decision::Replace);

        // A tie from a non-local node does not replace.
        let c = NodeName::new("C");
        let decision = offer(&gen(0, 5, 0), &c, &a, Some((&best, &b)));
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn older_generation_is_accepted_without_replacing() {
        let (a, b) = (NodeName::new("A"), NodeName::new("B"));
        let best = gen(0, 5, 3);
        let decision = offer(&gen(0, 5, 0), &b, &a, Some((&best, &b)));
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn unknown_schema_is_rejected_even_if_it_would_otherwise_replace() {
        let (a, b) = (NodeName::new("A"), NodeName::new("B"));
        let best = gen(0, 5, 0);
        let unknown_but_newer = Generation { validation_schema: None, ..gen(0, 5, 3) };
        assert_eq!(offer(&unknown_but_newer, &b, &a, Some((&best, &b))), Decision::Reject);
    }
}
