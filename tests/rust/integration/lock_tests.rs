//! Lock set computation and feature id navigation against the road network fixture

#[cfg(test)]
mod lock_integration_tests {
    use std::collections::BTreeSet;

    use featurestore::datastore::ErrorKind;
    use featurestore::filter::Filter;
    use featurestore::request_handler::lock_handler::{LockRequest, LockTable};
    use featurestore::FeatureStore;

    use crate::fixtures::{connection, fid, store};

    fn id_set(store: &FeatureStore, ids: &[&str]) -> BTreeSet<featurestore::feature_catalog::FeatureId> {
        ids.iter().map(|id| fid(store, id)).collect()
    }

    /// Test that locking a sign also locks the road using it and everything referencing that road
    #[test]
    fn test_lock_includes_superfeatures() {
        let store = store();
        let locked = store
            .lock(&mut connection(), &[LockRequest::new("StopSign", None)])
            .unwrap();
        // Road:11 references Person:1 as maintainer and Pond:2 has Road:10 as
        // shore; YieldSign:100 shares the sign id but not the type and stays unlocked
        assert_eq!(
            locked,
            id_set(&store, &["StopSign:100", "Road:10", "Person:1", "Road:11", "Pond:2"])
        );
    }

    #[test]
    fn test_lock_without_references() {
        let store = store();
        let locked = store
            .lock(
                &mut connection(),
                &[LockRequest::new("Road", Some(Filter::eq("name", "Coast")))],
            )
            .unwrap();
        assert_eq!(locked, id_set(&store, &["Road:12"]));
    }

    #[test]
    fn test_lock_abstract_type_covers_all_substitutions() {
        let store = store();
        let locked = store
            .lock(&mut connection(), &[LockRequest::new("AbstractSign", None)])
            .unwrap();
        assert_eq!(
            locked,
            id_set(
                &store,
                &[
                    "StopSign:100",
                    "YieldSign:100",
                    "SpeedSign:200",
                    "Road:10",
                    "Road:11",
                    "Person:1",
                    "Pond:2",
                ]
            )
        );
    }

    #[test]
    fn test_lock_includes_subfeatures() {
        let store = store();
        let locked = store
            .lock(
                &mut connection(),
                &[LockRequest::new("Person", Some(Filter::eq("name", "Bob")))],
            )
            .unwrap();
        // Bob's inline address is a subfeature; Road:11 has Bob as owner
        assert_eq!(
            locked,
            id_set(&store, &["Person:2", "Address:2", "Road:11"])
        );
    }

    #[test]
    fn test_lock_on_shared_table_keeps_to_its_type() {
        let store = store();
        let locked = store
            .lock(&mut connection(), &[LockRequest::new("Lake", None)])
            .unwrap();
        assert_eq!(locked, id_set(&store, &["Lake:1", "Lake:3", "Road:11"]));
    }

    /// Test that features reached through a shared table are only those of the right type
    #[test]
    fn test_lock_through_shared_table() {
        let store = store();
        let locked = store
            .lock(&mut connection(), &[LockRequest::new("Pond", None)])
            .unwrap();
        assert_eq!(
            locked,
            id_set(
                &store,
                &[
                    "Pond:2",
                    "Road:10",
                    "Road:11",
                    "Person:1",
                    "Address:1",
                    "StopSign:100",
                    "SpeedSign:200",
                ]
            )
        );
    }

    #[test]
    fn test_subfeatures_of_road() {
        let store = store();
        let subs = store
            .subfeatures_of(&mut connection(), &fid(&store, "Road:10"))
            .unwrap();
        assert_eq!(subs.keys().collect::<Vec<_>>(), vec!["owner", "signs"]);
        assert_eq!(subs["owner"], vec![fid(&store, "Person:1")]);
        assert_eq!(
            subs["signs"],
            vec![fid(&store, "StopSign:100"), fid(&store, "SpeedSign:200")]
        );
    }

    #[test]
    fn test_subfeature_in_shared_table() {
        let store = store();
        let subs = store
            .subfeatures_of(&mut connection(), &fid(&store, "Road:11"))
            .unwrap();
        assert_eq!(subs["lake"], vec![fid(&store, "Lake:1")]);

        let subs = store
            .subfeatures_of(&mut connection(), &fid(&store, "Pond:2"))
            .unwrap();
        assert_eq!(subs["shore"], vec![fid(&store, "Road:10")]);
    }

    #[test]
    fn test_superfeatures_in_shared_table() {
        let store = store();
        let supers = store
            .superfeatures_of(&mut connection(), &fid(&store, "Road:10"))
            .unwrap();
        assert_eq!(supers, id_set(&store, &["Person:1", "Pond:2"]));
    }

    #[test]
    fn test_superfeatures_of_inline_feature() {
        let store = store();
        let supers = store
            .superfeatures_of(&mut connection(), &fid(&store, "Address:1"))
            .unwrap();
        assert_eq!(supers, id_set(&store, &["Person:1"]));
    }

    #[test]
    fn test_locked_features_are_not_modifiable_by_others() {
        let store = store();
        let mut conn = connection();
        let locked = store
            .lock(&mut conn, &[LockRequest::new("StopSign", None)])
            .unwrap();
        let mut locks = LockTable::default();
        locks.acquire("lock-a", locked).unwrap();

        let name_a1 = Filter::eq("name", "A1");
        let err = store
            .determine_affected_and_modifiable_fids(&mut conn, "Road", Some(&name_a1), Some("lock-b"), &locks)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let fids = store
            .determine_affected_and_modifiable_fids(&mut conn, "Road", Some(&name_a1), Some("lock-a"), &locks)
            .unwrap();
        assert_eq!(fids, vec![fid(&store, "Road:10")]);

        assert_eq!(locks.release("lock-a"), 5);
        let fids = store
            .determine_affected_and_modifiable_fids(&mut conn, "Road", Some(&name_a1), None, &locks)
            .unwrap();
        assert_eq!(fids.len(), 1);
    }
}
