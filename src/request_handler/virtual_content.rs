//! Resolution of virtual content: function calls and special variables.

use crate::config::EngineConfig;
use crate::datastore::{Datastore, DatastoreError, Envelope, SqlType};
use crate::feature_catalog::{FunctionCall, FunctionParam, SpecialVariable, TemplatePart};
use crate::filter::Filter;
use crate::sql_builder::StatementBuffer;

/// Appends function calls and special variables to statements of one request
pub struct VirtualContentProvider<'a> {
    datastore: &'a dyn Datastore,
    query_bbox: Envelope,
}

impl<'a> VirtualContentProvider<'a> {
    /// The query bounding box is taken from `filter`, or the configured fallback box
    pub fn new(filter: Option<&Filter>, datastore: &'a dyn Datastore, config: &EngineConfig) -> Self {
        let query_bbox = match filter.and_then(Filter::bounding_box) {
            Some(envelope) if envelope.srs.is_some() => envelope.clone(),
            Some(envelope) => envelope.clone().with_srs(config.default_srs.clone()),
            None => config.fallback_envelope(),
        };
        Self {
            datastore,
            query_bbox,
        }
    }

    pub fn datastore(&self) -> &'a dyn Datastore {
        self.datastore
    }

    pub fn query_bbox(&self) -> &Envelope {
        &self.query_bbox
    }

    /// Append `call` with its markers substituted.
    ///
    /// Field parameters become columns qualified by `table_alias`, constants
    /// are spliced, special variables are bound as arguments.
    pub fn append_function_call(
        &self,
        query: &mut StatementBuffer,
        table_alias: &str,
        call: &FunctionCall,
    ) -> Result<(), DatastoreError> {
        for part in &call.parts {
            match part {
                TemplatePart::Text(text) => {
                    query.push_schema_text(text);
                }
                TemplatePart::Param(n) => {
                    let param = n.checked_sub(1).and_then(|i| call.params.get(i)).ok_or_else(|| {
                        DatastoreError::InconsistentMapping(format!(
                            "Function call '{}' has no parameter ${}",
                            call.template, n
                        ))
                    })?;
                    match param {
                        FunctionParam::Field(field) if field.sql_type == SqlType::Geometry => {
                            self.datastore
                                .append_geometry_column(query, table_alias, &field.column);
                        }
                        FunctionParam::Field(field) => {
                            query.push_qualified(table_alias, &field.column);
                        }
                        FunctionParam::Constant(constant) => {
                            query.push_schema_text(&constant.value);
                        }
                        FunctionParam::Variable(variable) => {
                            self.append_variable(query, *variable)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve `variable` and append it as a bind argument
    pub fn append_variable(
        &self,
        query: &mut StatementBuffer,
        variable: SpecialVariable,
    ) -> Result<(), DatastoreError> {
        let value = match variable {
            SpecialVariable::QueryBbox => self
                .datastore
                .encode_geometry(&self.query_bbox.to_geometry()),
        }
        .map_err(|e| DatastoreError::SpecialVariable {
            variable: variable.to_string(),
            source: Box::new(e),
        })?;
        query.push_argument(value, SqlType::Geometry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{Geometry, SqlValue};
    use crate::feature_catalog::{ConstantContent, MappingField};
    use crate::filter::PropertyName;
    use crate::sql_builder::SchemaText;
    use crate::testing::TestDatastore;

    struct NoGeometryEncoding;

    impl Datastore for NoGeometryEncoding {
        fn name(&self) -> &str {
            "plain"
        }

        fn decode_geometry(&self, _: &SqlValue, _: &str) -> Result<Option<Geometry>, DatastoreError> {
            Ok(None)
        }

        fn encode_geometry(&self, _: &Geometry) -> Result<SqlValue, DatastoreError> {
            Err(DatastoreError::unsupported_with_context("geometry encoding", "plain"))
        }
    }

    fn intersects_call() -> FunctionCall {
        FunctionCall::new(
            "ST_Intersects($1,$2) AND $3",
            vec![
                FunctionParam::Field(MappingField::new("road", "geom", SqlType::Geometry)),
                FunctionParam::Variable(SpecialVariable::QueryBbox),
                FunctionParam::Constant(ConstantContent {
                    value: SchemaText::new("1=1"),
                }),
            ],
            SqlType::Boolean,
        )
        .unwrap()
    }

    #[test]
    fn test_function_call_substitution() {
        let config = EngineConfig::default();
        let provider = VirtualContentProvider::new(None, &TestDatastore, &config);
        let mut query = StatementBuffer::new();
        provider
            .append_function_call(&mut query, "X2", &intersects_call())
            .unwrap();
        assert_eq!(query.text(), "ST_Intersects(X2.geom,?) AND 1=1");
        assert_eq!(query.arguments().len(), 1);
        assert_eq!(query.arguments()[0].sql_type, SqlType::Geometry);
        // degenerate fallback box
        assert_eq!(
            query.arguments()[0].value,
            SqlValue::from("POLYGON((0 0,0 0,0 0,0 0,0 0))")
        );
    }

    #[test]
    fn test_bbox_is_taken_from_filter() {
        let config = EngineConfig::default();
        let filter = Filter::BBox {
            property: PropertyName::new("geom"),
            envelope: Envelope::new(1.0, 2.0, 3.0, 4.0),
        };
        let provider = VirtualContentProvider::new(Some(&filter), &TestDatastore, &config);
        assert_eq!(provider.query_bbox().max_y, 4.0);
        assert_eq!(provider.query_bbox().srs.as_deref(), Some("EPSG:4326"));
    }

    #[test]
    fn test_variable_resolution_failure_is_wrapped() {
        let config = EngineConfig::default();
        let provider = VirtualContentProvider::new(None, &NoGeometryEncoding, &config);
        let mut query = StatementBuffer::new();
        let err = provider
            .append_function_call(&mut query, "X1", &intersects_call())
            .unwrap_err();
        assert!(matches!(err, DatastoreError::SpecialVariable { .. }));
        assert_eq!(err.kind(), crate::datastore::ErrorKind::UnsupportedCapability);
    }
}
