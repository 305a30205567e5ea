//! Feature catalog YAML loading and validation

#[cfg(test)]
mod catalog_loading_tests {
    use std::io::Write;

    use featurestore::datastore::{SqlType, SqlValue};
    use featurestore::feature_catalog::{
        CatalogError, FeatureCatalogConfig, FeatureId, PropertyContent, RelationPath,
    };
    use test_case::test_case;

    const PARCELS: &str = r#"
name: cadastre
feature_types:
  - name: AbstractParcel
    abstract: true
  - name: Parcel
    table: parcel
    substitution_group: AbstractParcel
    id:
      - {column: district, sql_type: integer}
      - {column: number, sql_type: integer}
    envelope_property: shape
    properties:
      - name: area
        column: area
        sql_type: double
      - name: shape
        kind: geometry
        column: geom
        srs: EPSG:25832
        native_srs_code: 25832
      - name: owner
        kind: feature
        feature_type: Owner
        relations:
          - from_table: parcel
            to_table: owner
            columns: [[owner_id, id]]
  - name: Owner
    table: owner
    id: {column: id, sql_type: integer}
    properties:
      - name: name
        column: name
        sql_type: varchar
"#;

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// Test that a catalog file loads and builds into typed metadata
    #[test]
    fn test_catalog_from_file() {
        let file = yaml_file(PARCELS);
        let catalog = FeatureCatalogConfig::from_yaml_file(file.path())
            .and_then(|config| config.build())
            .unwrap();

        let parcel = catalog.feature_type("Parcel").unwrap();
        assert_eq!(parcel.id_fields().len(), 2);
        assert_eq!(parcel.envelope_property.as_deref(), Some("shape"));
        assert!(matches!(
            parcel.property("shape").unwrap().content,
            PropertyContent::Geometry { .. }
        ));

        let owner = parcel.property("owner").unwrap();
        assert!(matches!(owner.relation_path(), RelationPath::Single(_)));
        // join columns take the type of the id column they point at
        let RelationPath::Single(relation) = owner.relation_path() else {
            unreachable!()
        };
        assert_eq!(relation.to_fields[0].sql_type, SqlType::Integer);

        let concrete: Vec<&str> = catalog
            .concrete_substitutions("AbstractParcel")
            .iter()
            .map(|ft| ft.name.as_str())
            .collect();
        assert_eq!(concrete, vec!["Parcel"]);
    }

    #[test]
    fn test_composite_feature_id() {
        let catalog = FeatureCatalogConfig::from_yaml_str(PARCELS)
            .and_then(|config| config.build())
            .unwrap();
        let fid = FeatureId::parse(&catalog, "Parcel:7|12").unwrap();
        assert_eq!(fid.values(), &[SqlValue::Integer(7), SqlValue::Integer(12)]);
        assert_eq!(fid.to_string(), "Parcel:7|12");
        assert!(FeatureId::parse(&catalog, "Parcel:7").is_err());
        assert!(FeatureId::parse(&catalog, "AbstractParcel:7|12").is_err());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = FeatureCatalogConfig::from_yaml_file("/nonexistent/catalog.yaml").unwrap_err();
        assert!(matches!(err, CatalogError::ConfigReadError { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let file = yaml_file("feature_types: [name: {");
        let err = FeatureCatalogConfig::from_yaml_file(file.path()).unwrap_err();
        assert!(matches!(err, CatalogError::ConfigParseError { .. }));
    }

    #[test_case("feature_types: []", |e| matches!(e, CatalogError::InvalidConfig { .. }) ; "empty catalog")]
    #[test_case(
        "feature_types: [{name: A, table: a, id: id}, {name: A, table: b, id: id}]",
        |e| matches!(e, CatalogError::InvalidConfig { .. }) ; "duplicate type"
    )]
    #[test_case(
        "feature_types: [{name: A, id: id}]",
        |e| matches!(e, CatalogError::InvalidConfig { .. }) ; "concrete type without table"
    )]
    #[test_case(
        "feature_types: [{name: A, table: a, id: id}, {name: B, table: b, id: id, substitution_group: A}]",
        |e| matches!(e, CatalogError::InvalidConfig { .. }) ; "concrete substitution group"
    )]
    #[test_case(
        "feature_types: [{name: A, table: a, id: id, envelope_property: n, properties: [{name: n, column: n}]}]",
        |e| matches!(e, CatalogError::InvalidConfig { .. }) ; "envelope is not a geometry"
    )]
    #[test_case(
        "feature_types: [{name: A, table: a, id: id, properties: [{name: n, column: n, relations: [{from_table: x, to_table: y, columns: [[id, a_id]]}]}]}]",
        |e| matches!(e, CatalogError::InvalidRelation { .. }) ; "relation not starting at the type table"
    )]
    fn test_invalid_catalogs(yaml: &str, expected: fn(&CatalogError) -> bool) {
        let err = FeatureCatalogConfig::from_yaml_str(yaml)
            .and_then(|config| config.build())
            .unwrap_err();
        assert!(expected(&err), "unexpected error: {}", err);
    }
}
