//! HTTP-method-shaped service over a [`Collection`].

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{Collection, CollectionError};
use crate::app::{App, Routes, Service};
use crate::context::{Context, Method};
use crate::database::{CursorOptions, DatabaseError, IdSelector, Populate, SortOrder};
use crate::error::{BoxError, ServiceError};
use crate::schema::coerce::coerce_number;
use crate::schema::Schema;

const LIMIT: &str = "$limit";
const SKIP: &str = "$skip";
const SORT: &str = "$sort";
const SELECT: &str = "$select";
const POPULATE: &str = "$populate";

fn non_negative_integer(value: &Value) -> Option<u64> {
    let n = coerce_number(value)?.as_f64()?;
    (n >= 0.0 && n.fract() == 0.0).then_some(n as u64)
}

/// Field names given as an array or a comma-separated string.
fn field_list(value: &Value) -> Vec<String> {
    let names: Vec<String> = match value {
        Value::String(s) => s.split(',').map(|f| f.trim().to_string()).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|f| f.trim().to_string())
            .collect(),
        _ => Vec::new(),
    };
    names.into_iter().filter(|f| !f.is_empty()).collect()
}

/// Splits the reserved `$` keys out of a request query.
///
/// Returns the residual data filter and the cursor options. `$sort` entries
/// other than `"1"`/`"-1"` and uncoercible `$limit`/`$skip` values are
/// dropped; populating a field that is not a relation is a bad request.
pub fn parse_query(
    query: &Map<String, Value>,
    schema: &Schema,
    max_limit: Option<u64>,
) -> Result<(Map<String, Value>, CursorOptions), ServiceError> {
    let mut filter = Map::new();
    let mut options = CursorOptions::default();

    for (key, value) in query {
        match key.as_str() {
            // zero means no limit, so the configured maximum still applies
            LIMIT => options.limit = non_negative_integer(value).filter(|limit| *limit > 0),
            SKIP => options.skip = non_negative_integer(value),
            SORT => {
                if let Value::Object(fields) = value {
                    options.sort = fields
                        .iter()
                        .filter_map(|(field, order)| Some((field.clone(), SortOrder::parse(order)?)))
                        .collect();
                }
            }
            SELECT => options.select = Some(field_list(value)),
            POPULATE => {
                for field in field_list(value) {
                    // only top-level relation fields are populated
                    let collection = schema
                        .definitions()
                        .get(&field)
                        .and_then(|definition| definition.relation_target())
                        .ok_or_else(|| {
                            ServiceError::bad_request(format!("Cannot populate field {}", field))
                        })?
                        .to_string();
                    options.populate.push(Populate { field, collection });
                }
            }
            _ => {
                filter.insert(key.clone(), value.clone());
            }
        }
    }

    if let Some(max) = max_limit {
        options.limit = Some(options.limit.map_or(max, |limit| limit.min(max)));
    }
    Ok((filter, options))
}

/// Maps collection failures onto service errors. Errors without a fixed
/// status propagate unchanged.
pub fn translate_error(error: CollectionError) -> BoxError {
    match error {
        CollectionError::Validation(e) => ServiceError::from(e).into(),
        CollectionError::Database(DatabaseError::Duplicate {
            collection,
            field,
            value,
        }) => ServiceError::conflict(format!("Duplicate value for unique field '{}'", field))
            .with_data(json!({ "collection": collection, "field": field, "value": value }))
            .into(),
        CollectionError::Database(DatabaseError::InvalidQuery(reason)) => {
            ServiceError::bad_request(format!("Invalid query: {}", reason)).into()
        }
        other => other.into(),
    }
}

pub struct CollectionService {
    collection: Arc<Collection>,
    max_limit: Option<u64>,
}

impl CollectionService {
    pub fn new(collection: Arc<Collection>) -> Self {
        Self {
            collection,
            max_limit: None,
        }
    }

    #[must_use]
    pub fn with_max_limit(mut self, max_limit: Option<u64>) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    async fn dispatch(&self, ctx: &Context) -> Result<Value, BoxError> {
        let schema = self.collection.schema().await.map_err(translate_error)?;
        let (filter, options) = parse_query(&ctx.query, &schema, self.max_limit)?;
        let id = ctx.param("id").map(IdSelector::from);
        let data = ctx.data.clone().unwrap_or(Value::Null);
        let collection = &self.collection;

        let result = match (ctx.method, id) {
            (Method::Create, None) => collection.create(&data, &options).await,
            (Method::Find, None) => collection.find(&filter, &options).await,
            (Method::Get, Some(id)) => collection.get(id, &filter, &options).await,
            (Method::Patch, Some(id)) => collection.patch(id, &data, &options).await,
            (Method::Remove, Some(id)) => collection.remove(id, &options).await,
            (Method::Create, Some(_)) | (Method::Find, Some(_)) => {
                return Err(ServiceError::method_not_allowed(format!(
                    "Method '{}' does not accept an id",
                    ctx.method
                ))
                .into())
            }
            (method, None) => {
                return Err(ServiceError::method_not_allowed(format!(
                    "Method '{}' requires an id",
                    method
                ))
                .into())
            }
        };
        result.map_err(translate_error)
    }
}

#[async_trait]
impl Service for CollectionService {
    async fn handle(&self, ctx: &mut Context, _app: &App) -> Result<(), BoxError> {
        let result = self.dispatch(ctx).await?;
        ctx.result = Some(result);
        Ok(())
    }

    fn register(&self, routes: &mut Routes) {
        routes.install("").install(":id");
    }
}
