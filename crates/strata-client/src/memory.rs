//! In-memory Transport backend.
//!
//! `MemoryTransport` holds ordered collections of raw records and serves
//! them through the same request/response envelope the wire transport uses:
//! `limit`-sized pages, opaque forward cursors, entity CRUD, and `NotFound`
//! for paths that have never been written. It backs the collection tests and
//! works as an offline stand-in for the real API.
//!
//! The `ql` predicate is not evaluated; the fixture set is paged in
//! insertion order. The server-side query engine is not this crate's
//! concern.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::entity::{ATTR_CREATED, ATTR_MODIFIED, ATTR_NAME, ATTR_TYPE, ATTR_USERNAME, ATTR_UUID};
use crate::query::{DEFAULT_PAGE_LIMIT, QUERY_PARAM_CURSOR, QUERY_PARAM_LIMIT};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport, TransportError};

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, Vec<Map<String, Value>>>,
}

/// Transport over an in-process record store.
///
/// Cloning shares the underlying store, so a seeded transport can be handed
/// to a client and inspected from the test afterward.
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection as if each record had been written through the
    /// API: missing `uuid`, `type`, and timestamps are filled in the way
    /// the server would on create.
    pub fn seed(&self, path: &str, records: Vec<Value>) {
        let mut state = self.inner.lock().expect("memory transport mutex poisoned");
        let collection = state.collections.entry(normalize(path)).or_default();
        for record in records {
            let mut record = match record {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
            };
            materialize(&mut record, path);
            collection.push(record);
        }
    }

    /// Seed raw records verbatim, without server-side field assignment.
    /// Useful for exercising how callers handle malformed data.
    pub fn seed_raw(&self, path: &str, records: Vec<Value>) {
        let mut state = self.inner.lock().expect("memory transport mutex poisoned");
        let collection = state.collections.entry(normalize(path)).or_default();
        for record in records {
            match record {
                Value::Object(map) => collection.push(map),
                other => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    collection.push(map);
                }
            }
        }
    }

    /// Number of records currently stored under a path.
    pub fn record_count(&self, path: &str) -> usize {
        let state = self.inner.lock().expect("memory transport mutex poisoned");
        state
            .collections
            .get(&normalize(path))
            .map_or(0, Vec::len)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, TransportError> {
        self.inner
            .lock()
            .map_err(|_| TransportError::Network("memory transport mutex poisoned".to_string()))
    }

    fn get_page(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let state = self.lock()?;
        let path = normalize(&request.path);

        if let Some(records) = state.collections.get(&path) {
            let limit = request
                .query_param(QUERY_PARAM_LIMIT)
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(DEFAULT_PAGE_LIMIT as usize);
            let offset = match request.query_param(QUERY_PARAM_CURSOR) {
                Some(token) => decode_cursor(token)?,
                None => 0,
            };

            let end = records.len().min(offset.saturating_add(limit));
            let page: Vec<Value> = records
                .get(offset..end)
                .unwrap_or_default()
                .iter()
                .cloned()
                .map(Value::Object)
                .collect();
            let cursor = (end < records.len()).then(|| encode_cursor(end));

            let count = page.len() as u64;
            return Ok(ApiResponse {
                entities: page,
                cursor,
                count: Some(count),
                action: Some("get".to_string()),
                path: Some(format!("/{path}")),
                ..ApiResponse::default()
            });
        }

        // Entity read: the last path segment addresses one record.
        let (parent, id) = split_entity_path(&path)?;
        let records = state
            .collections
            .get(parent)
            .ok_or_else(|| not_found(&path))?;
        let record = find_record(records, id).ok_or_else(|| not_found(&path))?;
        Ok(entity_response("get", &path, record.clone()))
    }

    fn create(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut state = self.lock()?;
        let path = normalize(&request.path);
        let mut record = body_object(request)?;
        materialize(&mut record, &path);

        // Collections come into being on first write.
        state
            .collections
            .entry(path.clone())
            .or_default()
            .push(record.clone());
        Ok(entity_response("post", &path, record))
    }

    fn update(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut state = self.lock()?;
        let path = normalize(&request.path);
        let (parent, id) = split_entity_path(&path)?;
        let body = body_object(request)?;

        let records = state
            .collections
            .get_mut(parent)
            .ok_or_else(|| not_found(&path))?;
        let record = find_record_mut(records, id).ok_or_else(|| not_found(&path))?;

        // Full replace, with the server-owned fields carried over.
        let uuid = record.get(ATTR_UUID).cloned();
        let created = record.get(ATTR_CREATED).cloned();
        let entity_type = record.get(ATTR_TYPE).cloned();
        *record = body;
        if let Some(uuid) = uuid {
            record.insert(ATTR_UUID.to_string(), uuid);
        }
        if let Some(created) = created {
            record.insert(ATTR_CREATED.to_string(), created);
        }
        if let Some(entity_type) = entity_type {
            record.insert(ATTR_TYPE.to_string(), entity_type);
        }
        record.insert(ATTR_MODIFIED.to_string(), json!(now_millis()));

        Ok(entity_response("put", &path, record.clone()))
    }

    fn delete(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut state = self.lock()?;
        let path = normalize(&request.path);
        let (parent, id) = split_entity_path(&path)?;

        let records = state
            .collections
            .get_mut(parent)
            .ok_or_else(|| not_found(&path))?;
        let position = records
            .iter()
            .position(|record| record_matches(record, id))
            .ok_or_else(|| not_found(&path))?;
        let removed = records.remove(position);
        Ok(entity_response("delete", &path, removed))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        match request.method {
            Method::Get => self.get_page(&request),
            Method::Post => self.create(&request),
            Method::Put => self.update(&request),
            Method::Delete => self.delete(&request),
        }
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn not_found(path: &str) -> TransportError {
    TransportError::NotFound {
        path: path.to_string(),
    }
}

fn split_entity_path(path: &str) -> Result<(&str, &str), TransportError> {
    path.rsplit_once('/').ok_or_else(|| not_found(path))
}

fn body_object(request: &ApiRequest) -> Result<Map<String, Value>, TransportError> {
    match &request.body {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(TransportError::Api {
            status: 400,
            code: "illegal_argument".to_string(),
            description: format!("request body must be a JSON object, got {other}"),
        }),
        None => Ok(Map::new()),
    }
}

fn record_matches(record: &Map<String, Value>, id: &str) -> bool {
    [ATTR_UUID, ATTR_NAME, ATTR_USERNAME]
        .iter()
        .any(|key| record.get(*key).and_then(Value::as_str) == Some(id))
}

fn find_record<'a>(records: &'a [Map<String, Value>], id: &str) -> Option<&'a Map<String, Value>> {
    records.iter().find(|record| record_matches(record, id))
}

fn find_record_mut<'a>(
    records: &'a mut [Map<String, Value>],
    id: &str,
) -> Option<&'a mut Map<String, Value>> {
    records.iter_mut().find(|record| record_matches(record, id))
}

/// Fill in the fields the server assigns on create.
fn materialize(record: &mut Map<String, Value>, path: &str) {
    if !record.contains_key(ATTR_UUID) {
        record.insert(ATTR_UUID.to_string(), json!(Uuid::new_v4().to_string()));
    }
    if !record.contains_key(ATTR_TYPE) {
        let entity_type = path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(path);
        record.insert(ATTR_TYPE.to_string(), json!(entity_type));
    }
    let now = json!(now_millis());
    record
        .entry(ATTR_CREATED.to_string())
        .or_insert_with(|| now.clone());
    record.entry(ATTR_MODIFIED.to_string()).or_insert(now);
}

fn entity_response(action: &str, path: &str, record: Map<String, Value>) -> ApiResponse {
    ApiResponse {
        entities: vec![Value::Object(record)],
        count: Some(1),
        action: Some(action.to_string()),
        path: Some(format!("/{path}")),
        ..ApiResponse::default()
    }
}

fn encode_cursor(offset: usize) -> String {
    format!("{offset:08x}")
}

fn decode_cursor(token: &str) -> Result<usize, TransportError> {
    usize::from_str_radix(token, 16).map_err(|_| TransportError::Api {
        status: 400,
        code: "illegal_argument".to_string(),
        description: format!("invalid paging cursor: {token}"),
    })
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
