//! Query requests against the road network fixture

#[cfg(test)]
mod query_integration_tests {
    use std::collections::BTreeSet;

    use featurestore::datastore::{Envelope, ErrorKind};
    use featurestore::feature_catalog::FeatureId;
    use featurestore::feature::{FeatureCollection, PropertyValue, QueryResult, TupleCollection};
    use featurestore::filter::{ComparisonOp, Filter, Operand, PropertyName, SortProperty};
    use featurestore::request_handler::lock_handler::LockTable;
    use featurestore::request_handler::property_paths::PropertyPath;
    use featurestore::request_handler::query_handler::{Query, ResultType};
    use serde_json::json;
    use test_case::test_case;

    use crate::fixtures::{connection, fid, store};

    fn features(query: &Query) -> FeatureCollection {
        match store().query(&mut connection(), query).unwrap() {
            QueryResult::Features(features) => features,
            other => panic!("expected features, got {:?}", other),
        }
    }

    fn tuples(query: &Query) -> TupleCollection {
        match store().query(&mut connection(), query).unwrap() {
            QueryResult::Tuples(tuples) => tuples,
            other => panic!("expected tuples, got {:?}", other),
        }
    }

    fn ids(features: &FeatureCollection) -> Vec<String> {
        features.ids().iter().map(ToString::to_string).collect()
    }

    fn by_name() -> Vec<SortProperty> {
        vec![SortProperty {
            property: PropertyName::new("name"),
            descending: false,
        }]
    }

    /// Test that a complete road is assembled with nested, related and external content
    #[test]
    fn test_complete_feature_assembly() {
        let query = Query {
            filter: Some(Filter::eq("name", "A1")),
            ..Query::for_type("Road")
        };
        let roads = features(&query);
        assert_eq!(ids(&roads), vec!["Road:10"]);

        let json = &roads.to_json()[0]["properties"];
        assert_eq!(json["name"], "A1");
        assert_eq!(json["lanes"], 2);
        assert_eq!(json["lane_count"], 2);
        assert_eq!(json["label"], "A1");
        assert_eq!(json["geom"], json!({"srs": "EPSG:4326", "wkt": "LINESTRING(0 0,4 2)"}));
        assert_eq!(json["maintainer"], json!({"href": "http://example.org/people/9"}));
        assert_eq!(json["alias"], json!(["Autobahn", "Motorway"]));
        // lake_id 2 belongs to a pond
        assert!(json.get("lake").is_none());

        let owner = &json["owner"];
        assert_eq!(owner["id"], "Person:1");
        assert_eq!(owner["properties"]["name"], "Ada");
        assert_eq!(owner["properties"]["address"]["id"], "Address:1");
        assert_eq!(owner["properties"]["address"]["properties"]["city"], "Bern");
        assert_eq!(owner["properties"]["favourite_road"], json!({"ref": "Road:10"}));

        assert_eq!(
            json["signs"],
            json!([
                {"id": "StopSign:100", "properties": {"text": "Stop"}},
                {"id": "SpeedSign:200", "properties": {"limit": 80}},
            ])
        );

        let road = roads.features().next().unwrap();
        assert_eq!(road.properties[0].name, "boundedBy");
        assert_eq!(
            road.property("boundedBy"),
            Some(&PropertyValue::Envelope(
                Envelope::new(0.0, 0.0, 4.0, 2.0).with_srs("EPSG:4326")
            ))
        );
    }

    /// Test that a cycle resolves to the very same feature instance
    #[test]
    fn test_cycle_refers_to_same_instance() {
        let roads = features(&Query {
            filter: Some(Filter::eq("name", "A1")),
            ..Query::for_type("Road")
        });
        let root = roads.roots()[0];
        let road = roads.get(root).unwrap();
        let Some(PropertyValue::Feature(owner)) = road.property("owner") else {
            panic!("owner is not an assembled feature");
        };
        let person = roads.get(*owner).unwrap();
        assert_eq!(person.property("favourite_road"), Some(&PropertyValue::Feature(root)));
    }

    #[test]
    fn test_function_property_is_computed_by_the_database() {
        let roads = features(&Query {
            filter: Some(Filter::eq("name", "Bypass")),
            property_names: vec![PropertyPath::parse("label")],
            ..Query::for_type("Road")
        });
        assert_eq!(roads.to_json()[0]["properties"]["label"], "BYPASS");
    }

    #[test]
    fn test_polymorphic_property_picks_concrete_type() {
        let roads = features(&Query {
            filter: Some(Filter::eq("name", "Bypass")),
            property_names: vec![PropertyPath::parse("signs")],
            ..Query::for_type("Road")
        });
        assert_eq!(
            roads.to_json()[0]["properties"]["signs"],
            json!({"id": "YieldSign:100", "properties": {"text": "Yield"}})
        );
    }

    #[test]
    fn test_related_feature_in_shared_table_has_its_own_type() {
        let roads = features(&Query {
            filter: Some(Filter::eq("name", "Bypass")),
            property_names: vec![PropertyPath::parse("lake")],
            ..Query::for_type("Road")
        });
        assert_eq!(
            roads.to_json()[0]["properties"]["lake"],
            json!({"id": "Lake:1", "properties": {"name": "Blue Lake"}})
        );
    }

    #[test_case(1, 3, &["Road:10", "Road:11", "Road:12"] ; "all")]
    #[test_case(2, 1, &["Road:11"] ; "second")]
    #[test_case(3, 5, &["Road:12"] ; "last")]
    #[test_case(4, 5, &[] ; "beyond the end")]
    fn test_pagination(start: usize, max: usize, expected: &[&str]) {
        let roads = features(&Query {
            sort: by_name(),
            start_position: start,
            max_features: Some(max),
            property_names: vec![PropertyPath::parse("name")],
            ..Query::for_type("Road")
        });
        assert_eq!(ids(&roads), expected);
    }

    #[test_case(None, 3 ; "no filter")]
    #[test_case(
        Some(Filter::Comparison {
            property: PropertyName::new("lanes"),
            op: ComparisonOp::Ge,
            value: Operand::Literal(2.into()),
        }),
        2 ; "lanes filter"
    )]
    fn test_count(filter: Option<Filter>, expected: u64) {
        let query = Query {
            filter,
            result_type: ResultType::Hits,
            ..Query::for_type("Road")
        };
        assert_eq!(
            store().query(&mut connection(), &query).unwrap(),
            QueryResult::Count(expected)
        );
    }

    #[test]
    fn test_bbox_filter() {
        let roads = features(&Query {
            filter: Some(Filter::BBox {
                property: PropertyName::new("geom"),
                envelope: Envelope::new(3.0, 1.0, 5.0, 3.0),
            }),
            property_names: vec![PropertyPath::parse("name")],
            ..Query::for_type("Road")
        });
        assert_eq!(ids(&roads), vec!["Road:10"]);
    }

    #[test]
    fn test_feature_id_filter() {
        let roads = features(&Query {
            filter: Some(Filter::FeatureIds {
                ids: vec!["Road:12".to_string(), "Road:10".to_string()],
            }),
            sort: by_name(),
            property_names: vec![PropertyPath::parse("name")],
            ..Query::for_type("Road")
        });
        assert_eq!(ids(&roads), vec!["Road:10", "Road:12"]);
    }

    fn joined_query() -> Query {
        Query {
            type_names: vec!["Road".to_string(), "Person".to_string()],
            aliases: Some(vec!["r".to_string(), "p".to_string()]),
            filter: Some(Filter::And(vec![
                Filter::eq(PropertyName::qualified("r", "name"), "A1"),
                Filter::eq(PropertyName::qualified("p", "name"), "Ada"),
            ])),
            ..Default::default()
        }
    }

    /// Test that a join shares features between the tuple and nested properties
    #[test]
    fn test_join_query_shares_instances() {
        let result = tuples(&joined_query());
        let tuple_ids: Vec<Vec<String>> = result
            .tuple_ids()
            .iter()
            .map(|t| t.iter().map(ToString::to_string).collect())
            .collect();
        assert_eq!(tuple_ids, vec![vec!["Road:10", "Person:1"]]);

        let tuple = &result.tuples()[0];
        let road = result.arena().get(tuple[0]).unwrap();
        assert_eq!(road.property("owner"), Some(&PropertyValue::Feature(tuple[1])));
    }

    #[test]
    fn test_join_count() {
        let query = Query {
            result_type: ResultType::Hits,
            ..joined_query()
        };
        assert_eq!(
            store().query(&mut connection(), &query).unwrap(),
            QueryResult::Count(1)
        );
    }

    /// Test that a query and a by-id fetch produce the same feature
    #[test]
    fn test_query_and_fetch_by_id_agree() {
        let store = store();
        let paths = vec![
            PropertyPath::parse("name"),
            PropertyPath::parse("lanes"),
            PropertyPath::parse("owner"),
        ];
        let query = Query {
            filter: Some(Filter::eq("name", "Bypass")),
            property_names: paths.clone(),
            ..Query::for_type("Road")
        };
        let QueryResult::Features(queried) = store.query(&mut connection(), &query).unwrap() else {
            panic!("expected features");
        };
        let mut queried = queried.to_json()[0].clone();
        queried["properties"]
            .as_object_mut()
            .unwrap()
            .remove("boundedBy");

        let fetched = store
            .fetch_feature(&mut connection(), &fid(&store, "Road:11"), &paths)
            .unwrap();
        assert_eq!(queried, fetched.to_json()[0]);
    }

    /// Test that a filtered query returns exactly the ids the filter determines
    #[test]
    fn test_query_ids_match_affected_ids() {
        let store = store();
        let lanes = Filter::Comparison {
            property: PropertyName::new("lanes"),
            op: ComparisonOp::Ge,
            value: Operand::Literal(2.into()),
        };
        let queried: BTreeSet<FeatureId> = features(&Query {
            filter: Some(lanes.clone()),
            property_names: vec![PropertyPath::parse("name")],
            ..Query::for_type("Road")
        })
        .ids()
        .into_iter()
        .collect();
        let affected: BTreeSet<FeatureId> = store
            .determine_affected_and_modifiable_fids(
                &mut connection(),
                "Road",
                Some(&lanes),
                None,
                &LockTable::default(),
            )
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(queried, affected);
        assert_eq!(queried, BTreeSet::from([fid(&store, "Road:10"), fid(&store, "Road:12")]));
    }

    #[test]
    fn test_repeated_queries_are_deterministic() {
        let query = Query {
            sort: by_name(),
            ..Query::for_type("Road")
        };
        let store = store();
        let first = store.query(&mut connection(), &query).unwrap().to_json();
        let second = store.query(&mut connection(), &query).unwrap().to_json();
        assert_eq!(first, second);
    }

    #[test]
    fn test_explain() {
        let query = Query {
            property_names: vec![PropertyPath::parse("name")],
            ..Query::for_type("Road")
        };
        let explanation = store().explain(&query).unwrap();
        assert_eq!(explanation.sql, "SELECT X1.id,X1.name,X1.geom FROM road X1");
        assert_eq!(explanation.plans[0].columns, vec!["road.id", "road.name", "road.geom"]);
    }

    /// Test that types sharing a table only see their own rows
    #[test]
    fn test_shared_table_is_restricted_by_type_tag() {
        let lakes = features(&Query {
            sort: by_name(),
            ..Query::for_type("Lake")
        });
        assert_eq!(ids(&lakes), vec!["Lake:1", "Lake:3"]);

        let query = Query {
            result_type: ResultType::Hits,
            ..Query::for_type("Pond")
        };
        assert_eq!(
            store().query(&mut connection(), &query).unwrap(),
            QueryResult::Count(1)
        );
    }

    #[test]
    fn test_fetch_by_id_respects_type_tag() {
        let store = store();
        let ponds = store
            .fetch_feature(&mut connection(), &fid(&store, "Pond:2"), &[])
            .unwrap();
        assert_eq!(ponds.to_json()[0]["properties"]["name"], "Mill Pond");

        let err = store
            .fetch_feature(&mut connection(), &fid(&store, "Lake:2"), &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentMapping);
    }

    #[test_case(Query::for_type("River"), ErrorKind::InvalidRequest ; "unknown type")]
    #[test_case(Query::for_type("AbstractSign"), ErrorKind::InvalidRequest ; "abstract type")]
    #[test_case(
        Query { srs_name: Some("EPSG:25832".to_string()), ..Query::for_type("Road") },
        ErrorKind::UnsupportedCapability ; "transform without transform function"
    )]
    fn test_request_errors(query: Query, kind: ErrorKind) {
        let err = store().query(&mut connection(), &query).unwrap_err();
        assert_eq!(err.kind(), kind);
    }
}
