use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use super::{id_key, Database, DatabaseResult, IdSelector, ID_FIELD};

/// Whether a cursor yields one document or a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Parses the wire form; only `"1"` and `"-1"` are accepted.
    pub fn parse(value: &Value) -> Option<SortOrder> {
        match value.as_str()? {
            "1" => Some(SortOrder::Ascending),
            "-1" => Some(SortOrder::Descending),
            _ => None,
        }
    }
}

/// Replace the ids stored in `field` with documents from `collection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Populate {
    pub field: String,
    pub collection: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOptions {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub sort: Vec<(String, SortOrder)>,
    pub select: Option<Vec<String>>,
    pub populate: Vec<Populate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Find { query: Map<String, Value> },
    Create { documents: Vec<Map<String, Value>> },
    Patch { ids: IdSelector, data: Map<String, Value> },
}

/// What an adapter receives from [`Cursor::exec`].
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRequest {
    pub collection: String,
    pub operation: Operation,
    pub target: Target,
    pub options: CursorOptions,
}

/// Deferred storage operation with chainable options.
pub struct Cursor<'a> {
    db: &'a dyn Database,
    request: CursorRequest,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(
        db: &'a dyn Database,
        collection: &str,
        operation: Operation,
        target: Target,
    ) -> Self {
        Self {
            db,
            request: CursorRequest {
                collection: collection.to_string(),
                operation,
                target,
                options: CursorOptions::default(),
            },
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.request.options.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.request.options.skip = Some(skip);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.request.options.sort.push((field.into(), order));
        self
    }

    pub fn select(mut self, fields: Vec<String>) -> Self {
        self.request.options.select = Some(fields);
        self
    }

    pub fn populate(mut self, field: impl Into<String>, collection: impl Into<String>) -> Self {
        self.request.options.populate.push(Populate {
            field: field.into(),
            collection: collection.into(),
        });
        self
    }

    /// Applies a whole option set at once, keeping options already chained.
    pub fn with_options(mut self, options: &CursorOptions) -> Self {
        let current = &mut self.request.options;
        if options.limit.is_some() {
            current.limit = options.limit;
        }
        if options.skip.is_some() {
            current.skip = options.skip;
        }
        current.sort.extend(options.sort.iter().cloned());
        if options.select.is_some() {
            current.select = options.select.clone();
        }
        current.populate.extend(options.populate.iter().cloned());
        self
    }

    pub fn request(&self) -> &CursorRequest {
        &self.request
    }

    /// Executes the request, then resolves population with one lookup per
    /// populated field.
    pub async fn exec(mut self) -> DatabaseResult<Value> {
        let populate = std::mem::take(&mut self.request.options.populate);
        let mut result = self.db.execute(self.request).await?;

        for request in &populate {
            populate_field(self.db, &mut result, request).await?;
        }

        Ok(result)
    }
}

fn documents_mut(result: &mut Value) -> Vec<&mut Map<String, Value>> {
    match result {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter_mut().filter_map(Value::as_object_mut).collect(),
        _ => Vec::new(),
    }
}

async fn populate_field(
    db: &dyn Database,
    result: &mut Value,
    populate: &Populate,
) -> DatabaseResult<()> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for document in documents_mut(result) {
        let referenced: Vec<&Value> = match document.get(&populate.field) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(id) => vec![id],
        };
        for id in referenced {
            if !id.is_object() && seen.insert(id_key(id)) {
                ids.push(id.clone());
            }
        }
    }

    if ids.is_empty() {
        return Ok(());
    }

    let related = db
        .execute(CursorRequest {
            collection: populate.collection.clone(),
            operation: Operation::Find {
                query: IdSelector::Many(ids).to_query(),
            },
            target: Target::Many,
            options: CursorOptions::default(),
        })
        .await?;

    let by_id: HashMap<String, Value> = match related {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|doc| {
                let key = id_key(doc.get(ID_FIELD)?);
                Some((key, doc))
            })
            .collect(),
        _ => HashMap::new(),
    };

    // ids without a matching document are left in place
    let resolve = |id: &Value| by_id.get(&id_key(id)).cloned().unwrap_or_else(|| id.clone());
    for document in documents_mut(result) {
        if let Some(value) = document.get_mut(&populate.field) {
            let populated = match &*value {
                Value::Array(items) => Value::Array(items.iter().map(resolve).collect()),
                Value::Null => Value::Null,
                id => resolve(id),
            };
            *value = populated;
        }
    }

    Ok(())
}
