use proptest::prelude::*;
use smartlambda_core::rights::{self, LambdaOperation, DEFINED_BITS};
use smartlambda_core::types::PermissionType;

fn kind() -> impl Strategy<Value = PermissionType> {
    (0u8..6).prop_map(|tag| PermissionType::try_from(tag).unwrap())
}

proptest! {
    /// canonicalise only ever adds defined bits.
    #[test]
    fn prop_canonicalise_superset(mask in any::<u8>()) {
        let canon = rights::canonicalise(mask);
        prop_assert_eq!(mask & DEFINED_BITS & canon, mask & DEFINED_BITS);
        prop_assert_eq!(canon & !DEFINED_BITS, 0);
    }

    #[test]
    fn prop_canonicalise_idempotent(mask in any::<u8>()) {
        let once = rights::canonicalise(mask);
        prop_assert_eq!(rights::canonicalise(once), once);
    }

    /// UPDATE implies READ after canonicalisation.
    #[test]
    fn prop_update_implies_read(mask in any::<u8>()) {
        let canon = rights::canonicalise(mask | rights::bit(PermissionType::Update));
        prop_assert!(canon & rights::bit(PermissionType::Read) != 0);
    }

    /// No implication other than UPDATE -> READ.
    #[test]
    fn prop_no_other_implications(held in kind(), needed in kind()) {
        let implied = rights::sufficient(rights::bit(held), rights::bit(needed));
        let expected = held == needed
            || (held == PermissionType::Update && needed == PermissionType::Read);
        prop_assert_eq!(implied, expected);
    }

    /// Sufficient should be equivalent when `have` is first canonicalised.
    #[test]
    fn prop_sufficient_equivalence(have in any::<u8>(), need in any::<u8>()) {
        let s1 = rights::sufficient(have, need);
        let s2 = rights::sufficient(rights::canonicalise(have), need);
        prop_assert_eq!(s1, s2);
    }

    #[test]
    fn prop_mask_round_trips_through_kinds(kinds in proptest::collection::vec(kind(), 0..8)) {
        let mask = rights::mask_of(kinds.iter().copied());
        let back = rights::mask_of(rights::kinds(mask));
        prop_assert_eq!(back, mask);
    }
}

#[test]
fn operations_map_to_a_closed_set_of_kinds() {
    use LambdaOperation::*;
    let expected = [
        (Save, PermissionType::Create),
        (DeployBinary, PermissionType::Update),
        (Update, PermissionType::Update),
        (Delete, PermissionType::Delete),
        (ExecuteSync, PermissionType::Execute),
        (ExecuteAsync, PermissionType::Execute),
        (Schedule, PermissionType::Update),
        (ReadSchedule, PermissionType::Read),
        (ReadMonitoring, PermissionType::Read),
    ];
    for (op, kind) in expected {
        assert_eq!(op.required_permission(), kind, "{}", op);
    }
    assert!(Save.allowed_before_save() && DeployBinary.allowed_before_save());
    assert!(!ExecuteSync.allowed_before_save());
}
