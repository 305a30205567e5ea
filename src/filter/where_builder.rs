use super::{
    CompiledFilter, Filter, FilterCompiler, FilterError, FilterScope, Operand, PropertyName,
    SortProperty,
};
use crate::datastore::{SqlType, SqlValue};
use crate::feature_catalog::{FeatureId, FeatureType, PropertyContent, PropertyType, SimpleContent};
use crate::request_handler::virtual_content::VirtualContentProvider;
use crate::sql_builder::{StatementBuffer, TableAliasGenerator};

/// Compiles filters over properties stored directly in the root tables.
///
/// Every requested feature type gets one alias; the join table list is the
/// comma-separated list of root tables, so join conditions between types are
/// expressed as property-to-property comparisons in the filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootTableWhereBuilder;

impl FilterCompiler for RootTableWhereBuilder {
    fn compile(
        &self,
        scope: &FilterScope<'_>,
        alias_generator: &mut TableAliasGenerator,
        content: &VirtualContentProvider<'_>,
    ) -> Result<CompiledFilter, FilterError> {
        let root_aliases = alias_generator.generate_unique_aliases(scope.feature_types.len());

        let mut from_clause = StatementBuffer::new();
        for (i, (ft, alias)) in scope.feature_types.iter().zip(&root_aliases).enumerate() {
            if i > 0 {
                from_clause.push_sql(",");
            }
            from_clause
                .push_identifier(&ft.table)
                .push_sql(" ")
                .push_identifier(alias);
        }

        let compiler = ScopedCompiler {
            scope,
            root_aliases: &root_aliases,
            content,
        };

        let mut where_clause = StatementBuffer::new();
        if let Some(filter) = scope.filter {
            where_clause.push_sql(" WHERE ");
            compiler.append_filter(&mut where_clause, filter)?;
        }

        let mut order_by = StatementBuffer::new();
        compiler.append_order_by(&mut order_by, scope.sort)?;

        Ok(CompiledFilter {
            root_aliases,
            from_clause,
            where_clause,
            order_by,
        })
    }
}

struct ScopedCompiler<'s, 'a> {
    scope: &'s FilterScope<'a>,
    root_aliases: &'s [String],
    content: &'s VirtualContentProvider<'s>,
}

impl<'s, 'a> ScopedCompiler<'s, 'a> {
    /// Index of the feature type a qualifier refers to
    fn type_index(&self, qualifier: &str) -> Result<usize, FilterError> {
        if let Some(aliases) = self.scope.aliases {
            if let Some(pos) = aliases.iter().position(|a| a == qualifier) {
                return Ok(pos);
            }
        }
        self.scope
            .feature_types
            .iter()
            .position(|ft| ft.name == qualifier)
            .ok_or_else(|| FilterError::UnknownQualifier(qualifier.to_string()))
    }

    fn resolve(&self, property: &PropertyName) -> Result<(usize, &'a PropertyType), FilterError> {
        let candidates: Vec<usize> = match &property.qualifier {
            Some(q) => vec![self.type_index(q)?],
            None => (0..self.scope.feature_types.len()).collect(),
        };
        let mut found = candidates.into_iter().filter_map(|i| {
            let ft: &'a FeatureType = self.scope.feature_types[i];
            ft.property(&property.name).map(|pt| (i, pt))
        });
        let first = found
            .next()
            .ok_or_else(|| FilterError::UnresolvedProperty(property.to_string()))?;
        if found.next().is_some() {
            // unqualified and present on several types
            return Err(FilterError::UnresolvedProperty(property.to_string()));
        }
        if !first.1.relations.is_empty() {
            return Err(FilterError::unsupported_with_context(
                property,
                "property is stored in a related table",
            ));
        }
        Ok(first)
    }

    /// Append the SQL expression of a property, returning its declared type
    fn append_property(
        &self,
        query: &mut StatementBuffer,
        property: &PropertyName,
    ) -> Result<SqlType, FilterError> {
        let (index, pt) = self.resolve(property)?;
        let alias = &self.root_aliases[index];
        match &pt.content {
            PropertyContent::Simple(SimpleContent::Field(field)) => {
                query.push_qualified(alias, &field.column);
                Ok(field.sql_type)
            }
            PropertyContent::Simple(SimpleContent::Constant(constant)) => {
                query.push_schema_text(&constant.value);
                Ok(SqlType::Other)
            }
            PropertyContent::Simple(SimpleContent::FunctionCall(call)) => {
                self.content.append_function_call(query, alias, call)?;
                Ok(call.result_type)
            }
            PropertyContent::Simple(SimpleContent::Variable(variable)) => {
                self.content.append_variable(query, *variable)?;
                Ok(SqlType::Geometry)
            }
            PropertyContent::Geometry { field, .. } => {
                self.content
                    .datastore()
                    .append_geometry_column(query, alias, &field.column);
                Ok(SqlType::Geometry)
            }
            PropertyContent::Feature { .. } => Err(FilterError::unsupported_with_context(
                property,
                "feature-valued properties cannot be compared",
            )),
        }
    }

    fn append_filter(&self, query: &mut StatementBuffer, filter: &Filter) -> Result<(), FilterError> {
        match filter {
            Filter::And(parts) => self.append_junction(query, parts, " AND ", "1=1"),
            Filter::Or(parts) => self.append_junction(query, parts, " OR ", "1=0"),
            Filter::Not(inner) => {
                query.push_sql("NOT (");
                self.append_filter(query, inner)?;
                query.push_sql(")");
                Ok(())
            }
            Filter::Comparison { property, op, value } => {
                let sql_type = self.append_property(query, property)?;
                query.push_sql(op.sql());
                match value {
                    Operand::Literal(literal) => {
                        query.push_argument(literal.clone(), sql_type);
                    }
                    Operand::Property { property } => {
                        self.append_property(query, property)?;
                    }
                }
                Ok(())
            }
            Filter::IsNull { property } => {
                self.append_property(query, property)?;
                query.push_sql(" IS NULL");
                Ok(())
            }
            Filter::Like { property, pattern } => {
                self.append_property(query, property)?;
                query
                    .push_sql(" LIKE ")
                    .push_argument(SqlValue::Text(pattern.clone()), SqlType::Varchar);
                Ok(())
            }
            Filter::FeatureIds { ids } => self.append_feature_ids(query, ids),
            Filter::BBox { property, envelope } => {
                let (index, pt) = self.resolve(property)?;
                let PropertyContent::Geometry { field, .. } = &pt.content else {
                    return Err(FilterError::unsupported_with_context(
                        property,
                        "bbox constraints need a geometry property",
                    ));
                };
                self.content.datastore().append_bbox_predicate(
                    query,
                    &self.root_aliases[index],
                    &field.column,
                    envelope,
                )?;
                Ok(())
            }
        }
    }

    fn append_junction(
        &self,
        query: &mut StatementBuffer,
        parts: &[Filter],
        separator: &'static str,
        empty: &'static str,
    ) -> Result<(), FilterError> {
        if parts.is_empty() {
            query.push_sql(empty);
            return Ok(());
        }
        query.push_sql("(");
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                query.push_sql(separator);
            }
            self.append_filter(query, part)?;
        }
        query.push_sql(")");
        Ok(())
    }

    /// Ids that name none of the root types match nothing
    fn append_feature_ids(&self, query: &mut StatementBuffer, ids: &[String]) -> Result<(), FilterError> {
        let mut matched = Vec::new();
        for id in ids {
            let fid = FeatureId::parse(self.scope.catalog, id)?;
            if let Some(index) = self
                .scope
                .feature_types
                .iter()
                .position(|ft| ft.name == fid.feature_type())
            {
                matched.push((index, fid));
            }
        }
        if matched.is_empty() {
            query.push_sql("1=0");
            return Ok(());
        }
        query.push_sql("(");
        for (i, (index, fid)) in matched.iter().enumerate() {
            if i > 0 {
                query.push_sql(" OR ");
            }
            let ft = self.scope.feature_types[*index];
            query.push_sql("(");
            for (j, (field, value)) in ft.id_fields().iter().zip(fid.values()).enumerate() {
                if j > 0 {
                    query.push_sql(" AND ");
                }
                query
                    .push_qualified(&self.root_aliases[*index], &field.column)
                    .push_sql("=")
                    .push_argument(value.clone(), field.sql_type);
            }
            query.push_sql(")");
        }
        query.push_sql(")");
        Ok(())
    }

    fn append_order_by(&self, query: &mut StatementBuffer, sort: &[SortProperty]) -> Result<(), FilterError> {
        for (i, criterion) in sort.iter().enumerate() {
            query.push_sql(if i == 0 { " ORDER BY " } else { "," });
            self.append_property(query, &criterion.property)?;
            if criterion.descending {
                query.push_sql(" DESC");
            }
        }
        Ok(())
    }
}
