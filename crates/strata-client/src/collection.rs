//! Cursor-paged collection traversal.
//!
//! `PagedCollection` owns the client-side paging state for one query view
//! over a remote collection: the current page of entities, a forward-only
//! entity pointer, the staged request cursor, the server-issued forward
//! cursor, and a LIFO of request cursors for backward paging. The server is
//! stateless across paging calls; every piece of traversal state lives here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entity::{Entity, EntityFactory};
use crate::error::{ClientError, ClientResult};
use crate::query::{QUERY_PARAM_CURSOR, Query};
use crate::transport::{ApiRequest, Transport, TransportError};

/// Counters for one collection's lifetime. Malformed records are dropped
/// silently from pages; the drop count is kept here so callers can observe
/// how much the defensive filtering discarded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagingStats {
    /// Successful fetches, including empty-page outcomes.
    pub pages_fetched: u64,
    /// Response records dropped because entity materialization rejected them.
    pub dropped_records: u64,
}

/// Serializable snapshot of a collection's traversal state.
///
/// A snapshot taken mid-traversal can be restored later against the same
/// backend and continue paging from the same position. Cursor tokens are
/// scoped to the query they were issued for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    pub resource_path: String,
    pub query: Query,
    pub page: Vec<Entity>,
    pub pointer: isize,
    pub cursor_stack: Vec<Option<String>>,
    pub cursor: Option<String>,
    pub next_cursor: Option<String>,
}

/// Client-side stateful view over a server-paginated query result.
///
/// All paging operations take `&mut self`, so the borrow checker enforces
/// the single-flight rule: a second paging call cannot start while a prior
/// call's future is outstanding. State is mutated only after a complete
/// response has been parsed; a fetch future dropped mid-flight leaves the
/// collection exactly as it was.
pub struct PagedCollection {
    transport: Arc<dyn Transport>,
    factory: Arc<dyn EntityFactory>,
    resource_path: String,
    query: Query,
    page: Vec<Entity>,
    pointer: isize,
    /// Request cursors of pages already traversed, most recent last.
    /// `None` is the first-page sentinel: retreating to it re-issues the
    /// original request with no cursor at all.
    cursor_stack: Vec<Option<String>>,
    /// Cursor staged for the next fetch.
    cursor: Option<String>,
    /// Forward cursor from the last response; present iff a further page
    /// exists.
    next_cursor: Option<String>,
    stats: PagingStats,
}

impl std::fmt::Debug for PagedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedCollection")
            .field("resource_path", &self.resource_path)
            .field("query", &self.query)
            .field("page", &self.page)
            .field("pointer", &self.pointer)
            .field("cursor_stack", &self.cursor_stack)
            .field("cursor", &self.cursor)
            .field("next_cursor", &self.next_cursor)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl PagedCollection {
    /// Construct an empty collection view. No request is issued; drive the
    /// first page in with [`fetch`](Self::fetch), or use
    /// [`Client::fetch_collection`](crate::Client::fetch_collection) for the
    /// combined form. A failed fetch leaves the value usable for retry.
    pub fn new(
        transport: Arc<dyn Transport>,
        factory: Arc<dyn EntityFactory>,
        resource_path: impl Into<String>,
        query: Query,
    ) -> Self {
        Self {
            transport,
            factory,
            resource_path: resource_path.into(),
            query,
            page: Vec::new(),
            pointer: -1,
            cursor_stack: Vec::new(),
            cursor: None,
            next_cursor: None,
            stats: PagingStats::default(),
        }
    }

    /// Restore a collection from a previously taken snapshot.
    pub fn from_state(
        transport: Arc<dyn Transport>,
        factory: Arc<dyn EntityFactory>,
        state: CollectionState,
    ) -> Self {
        let pointer = state.pointer.clamp(-1, state.page.len() as isize);
        Self {
            transport,
            factory,
            resource_path: state.resource_path,
            query: state.query,
            page: state.page,
            pointer,
            cursor_stack: state.cursor_stack,
            cursor: state.cursor,
            next_cursor: state.next_cursor,
            stats: PagingStats::default(),
        }
    }

    pub fn snapshot(&self) -> CollectionState {
        CollectionState {
            resource_path: self.resource_path.clone(),
            query: self.query.clone(),
            page: self.page.clone(),
            pointer: self.pointer,
            cursor_stack: self.cursor_stack.clone(),
            cursor: self.cursor.clone(),
            next_cursor: self.next_cursor.clone(),
        }
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Swap the query. Cursors are scoped to the query that issued them, so
    /// this also resets all paging state; the current page is kept until the
    /// next fetch replaces it.
    pub fn set_query(&mut self, query: Query) {
        self.query = query;
        self.reset_paging();
    }

    pub fn stats(&self) -> PagingStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.page.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page.is_empty()
    }

    /// The current page in server response order.
    pub fn entities(&self) -> &[Entity] {
        &self.page
    }

    /// (Re)populate the current page from the backend.
    ///
    /// The staged cursor, when present, is merged into the outgoing query
    /// under the reserved `cursor` key; otherwise that key is absent. On
    /// success the page is replaced wholesale (records the entity factory
    /// rejects are dropped and counted) and the pointer resets to before
    /// the first entity. On transport failure nothing is touched and the
    /// collection remains usable for retry.
    ///
    /// A `NotFound` transport outcome is success with an empty page:
    /// collections do not exist server-side until their first entity is
    /// written.
    pub async fn fetch(&mut self) -> ClientResult<()> {
        let mut params = self.query.to_params();
        if let Some(cursor) = &self.cursor {
            params.push((QUERY_PARAM_CURSOR.to_string(), cursor.clone()));
        }
        let request = ApiRequest::get(&self.resource_path).with_query(params);

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(TransportError::NotFound { .. }) => {
                self.page.clear();
                self.pointer = -1;
                self.next_cursor = None;
                self.stats.pages_fetched += 1;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let resource_type = self.resource_type();
        let mut page = Vec::with_capacity(response.entities.len());
        let mut dropped = 0;
        for record in &response.entities {
            match self.factory.build(record, resource_type) {
                Ok(entity) => page.push(entity),
                Err(_) => dropped += 1,
            }
        }

        self.page = page;
        self.pointer = -1;
        self.next_cursor = response.cursor;
        self.stats.pages_fetched += 1;
        self.stats.dropped_records += dropped;
        Ok(())
    }

    pub fn has_next_entity(&self) -> bool {
        let next = self.pointer + 1;
        next >= 0 && (next as usize) < self.page.len()
    }

    /// Advance the entity pointer and return the entity it lands on.
    /// Returns `None` at the end of the page without moving the pointer.
    pub fn next_entity(&mut self) -> Option<&Entity> {
        if !self.has_next_entity() {
            return None;
        }
        self.pointer += 1;
        self.page.get(self.pointer as usize)
    }

    pub fn has_previous_entity(&self) -> bool {
        let previous = self.pointer - 1;
        previous >= 0 && (previous as usize) < self.page.len()
    }

    /// Move the entity pointer back and return the entity it lands on.
    /// Returns `None` at the start of the page without moving the pointer.
    pub fn previous_entity(&mut self) -> Option<&Entity> {
        if !self.has_previous_entity() {
            return None;
        }
        self.pointer -= 1;
        self.page.get(self.pointer as usize)
    }

    /// Rewind the entity pointer to before the first entity so the same
    /// page can be iterated again. Page contents are untouched.
    pub fn reset_entity_pointer(&mut self) {
        self.pointer = -1;
    }

    pub fn has_next_page(&self) -> bool {
        self.next_cursor.is_some()
    }

    pub fn has_previous_page(&self) -> bool {
        !self.cursor_stack.is_empty()
    }

    /// Page forward: stage the server's forward cursor and fetch.
    ///
    /// The *request* cursor that produced the current page (the first-page
    /// sentinel for page one) is pushed onto the stack, so one
    /// later [`retreat_page`](Self::retreat_page) lands exactly on this
    /// page's original request state. Without a forward cursor this returns
    /// [`ClientError::NoNextPage`] synchronously; no request is issued.
    pub async fn advance_page(&mut self) -> ClientResult<()> {
        let Some(next) = self.next_cursor.clone() else {
            return Err(ClientError::NoNextPage);
        };
        self.cursor_stack.push(self.cursor.take());
        self.cursor = Some(next);
        self.page.clear();
        self.pointer = -1;
        self.fetch().await
    }

    /// Page backward: pop one request cursor off the stack, stage it, and
    /// fetch. One push per advance, one pop per retreat. With an empty stack
    /// this returns [`ClientError::NoPreviousPage`] synchronously; no
    /// request is issued.
    pub async fn retreat_page(&mut self) -> ClientResult<()> {
        let Some(previous) = self.cursor_stack.pop() else {
            return Err(ClientError::NoPreviousPage);
        };
        self.cursor = previous;
        self.page.clear();
        self.pointer = -1;
        self.fetch().await
    }

    /// Drop all cursor state: the stack, the staged cursor, and the forward
    /// cursor. The current page is kept. Required when the query changes:
    /// reusing a cursor with a different query is undefined server-side.
    pub fn reset_paging(&mut self) {
        self.cursor_stack.clear();
        self.cursor = None;
        self.next_cursor = None;
    }

    pub fn first_entity(&self) -> Option<&Entity> {
        self.page.first()
    }

    pub fn last_entity(&self) -> Option<&Entity> {
        self.page.last()
    }

    /// Look an entity up in the current page by its server identity.
    pub fn entity_by_uuid(&self, uuid: &Uuid) -> Option<&Entity> {
        self.page.iter().find(|entity| entity.uuid() == *uuid)
    }

    /// Create an entity in this collection and append it to the current
    /// page. The returned entity is the server's materialized record.
    pub async fn add_entity(&mut self, properties: Map<String, Value>) -> ClientResult<Entity> {
        let request = ApiRequest::post(&self.resource_path, Value::Object(properties));
        let response = self.transport.send(request).await?;
        let record = response.first_entity().ok_or_else(|| ClientError::MissingEntity {
            path: self.resource_path.clone(),
        })?;
        let entity = self.factory.build(record, self.resource_type())?;
        self.page.push(entity.clone());
        Ok(entity)
    }

    /// Delete an entity server-side and drop it from the current page.
    pub async fn destroy_entity(&mut self, uuid: &Uuid) -> ClientResult<()> {
        let path = join_path(&self.resource_path, &uuid.to_string());
        self.transport.send(ApiRequest::delete(path)).await?;
        self.page.retain(|entity| entity.uuid() != *uuid);
        if self.pointer >= self.page.len() as isize {
            self.pointer = self.page.len() as isize - 1;
        }
        Ok(())
    }

    /// The resource type entities of this collection carry: the last
    /// non-empty segment of the resource path.
    fn resource_type(&self) -> &str {
        self.resource_path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.resource_path)
    }
}

pub(crate) fn join_path(base: &str, id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::JsonEntityFactory;
    use crate::transport::{ApiResponse, Method};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a scripted sequence of transport outcomes and records every
    /// request it saw.
    struct ScriptedTransport {
        requests: Mutex<Vec<ApiRequest>>,
        outcomes: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<ApiResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                outcomes: Mutex::new(outcomes.into()),
            })
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".to_string())))
        }
    }

    fn uuid_for(n: u32) -> String {
        format!("00000000-0000-4000-8000-{n:012}")
    }

    fn page_response(range: std::ops::Range<u32>, cursor: Option<&str>) -> ApiResponse {
        let entities: Vec<Value> = range
            .map(|n| json!({ "uuid": uuid_for(n), "type": "cat", "index": n }))
            .collect();
        let mut raw = json!({ "entities": entities });
        if let Some(cursor) = cursor {
            raw["cursor"] = json!(cursor);
        }
        serde_json::from_value(raw).unwrap()
    }

    fn collection(transport: Arc<ScriptedTransport>) -> PagedCollection {
        PagedCollection::new(
            transport,
            Arc::new(JsonEntityFactory),
            "cats",
            Query::new().with_limit(10),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fetch_omits_cursor_key_until_one_is_staged() {
        let transport = ScriptedTransport::new(vec![
            Ok(page_response(0..10, Some("c-1"))),
            Ok(page_response(10..20, None)),
        ]);
        let mut cats = collection(transport.clone());

        cats.fetch().await.expect("first fetch should succeed");
        cats.advance_page().await.expect("advance should succeed");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].query_param("cursor"), None);
        assert_eq!(requests[1].query_param("cursor"), Some("c-1"));
        assert_eq!(requests[1].query_param("limit"), Some("10"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn transport_failure_leaves_state_untouched() {
        let transport = ScriptedTransport::new(vec![
            Ok(page_response(0..3, Some("c-1"))),
            Err(TransportError::Network("connection reset".to_string())),
        ]);
        let mut cats = collection(transport);

        cats.fetch().await.expect("first fetch should succeed");
        let before = cats.snapshot();
        let stats_before = cats.stats();

        let err = cats.fetch().await.expect_err("second fetch should fail");
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Network(_))
        ));
        assert_eq!(cats.snapshot(), before);
        assert_eq!(cats.stats(), stats_before);
        assert!(cats.has_next_page());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn not_found_is_an_empty_page_not_an_error() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::NotFound {
            path: "cats".to_string(),
        })]);
        let mut cats = collection(transport);

        cats.fetch().await.expect("not-found fetch should succeed");
        assert!(cats.is_empty());
        assert!(!cats.has_next_page());
        assert_eq!(cats.stats().pages_fetched, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn boundary_errors_are_synchronous_and_issue_no_request() {
        let transport = ScriptedTransport::new(vec![Ok(page_response(0..3, None))]);
        let mut cats = collection(transport.clone());
        cats.fetch().await.expect("fetch should succeed");

        let err = cats.advance_page().await.expect_err("no next page");
        assert!(matches!(err, ClientError::NoNextPage));
        assert!(err.is_page_boundary());

        let err = cats.retreat_page().await.expect_err("no previous page");
        assert!(matches!(err, ClientError::NoPreviousPage));

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(cats.len(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn records_without_uuid_are_dropped_and_counted() {
        let raw = json!({
            "entities": [
                { "uuid": uuid_for(1), "name": "enzo" },
                { "name": "no-identity" },
                { "uuid": "garbage" },
                { "uuid": uuid_for(2), "name": "bertha" },
            ]
        });
        let transport =
            ScriptedTransport::new(vec![Ok(serde_json::from_value(raw).unwrap())]);
        let mut cats = collection(transport);

        cats.fetch().await.expect("fetch should succeed");
        assert_eq!(cats.len(), 2);
        assert_eq!(cats.stats().dropped_records, 2);
        let names: Vec<_> = cats.entities().iter().filter_map(|e| e.name()).collect();
        assert_eq!(names, vec!["enzo", "bertha"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn entity_pointer_never_leaves_page_bounds() {
        let transport = ScriptedTransport::new(vec![Ok(page_response(0..2, None))]);
        let mut cats = collection(transport);
        cats.fetch().await.expect("fetch should succeed");

        assert!(!cats.has_previous_entity());
        assert!(cats.previous_entity().is_none());

        let first = cats.next_entity().expect("first entity").uuid();
        let second = cats.next_entity().expect("second entity").uuid();
        assert_ne!(first, second);

        // Exhausted: repeated calls return None and do not move the pointer.
        assert!(!cats.has_next_entity());
        assert!(cats.next_entity().is_none());
        assert!(cats.next_entity().is_none());

        let back = cats.previous_entity().expect("step back").uuid();
        assert_eq!(back, first);
        assert!(cats.previous_entity().is_none());

        cats.reset_entity_pointer();
        assert_eq!(cats.next_entity().expect("restart").uuid(), first);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn advance_then_retreat_restores_request_state() {
        let transport = ScriptedTransport::new(vec![
            Ok(page_response(0..10, Some("c-1"))),
            Ok(page_response(10..20, Some("c-2"))),
            Ok(page_response(0..10, Some("c-1"))),
        ]);
        let mut cats = collection(transport.clone());

        cats.fetch().await.expect("page 1");
        assert!(!cats.has_previous_page());

        cats.advance_page().await.expect("page 2");
        assert!(cats.has_previous_page());

        cats.retreat_page().await.expect("back to page 1");
        assert!(!cats.has_previous_page());

        // The third request must be identical to the first: no cursor key.
        let requests = transport.requests();
        assert_eq!(requests[2].query_param("cursor"), None);
        assert_eq!(requests[2].query, requests[0].query);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reset_paging_clears_cursors_but_keeps_page() {
        let transport = ScriptedTransport::new(vec![
            Ok(page_response(0..10, Some("c-1"))),
            Ok(page_response(10..20, Some("c-2"))),
        ]);
        let mut cats = collection(transport);
        cats.fetch().await.expect("page 1");
        cats.advance_page().await.expect("page 2");

        cats.reset_paging();
        assert!(!cats.has_next_page());
        assert!(!cats.has_previous_page());
        assert_eq!(cats.len(), 10);

        let state = cats.snapshot();
        assert_eq!(state.cursor, None);
        assert_eq!(state.next_cursor, None);
        assert!(state.cursor_stack.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn set_query_resets_paging_state() {
        let transport = ScriptedTransport::new(vec![Ok(page_response(0..10, Some("c-1")))]);
        let mut cats = collection(transport);
        cats.fetch().await.expect("page 1");
        assert!(cats.has_next_page());

        cats.set_query(Query::new().with_ql("select * where color = 'orange'"));
        assert!(!cats.has_next_page());
        assert!(!cats.has_previous_page());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn destroy_entity_drops_from_page_and_clamps_pointer() {
        let transport = ScriptedTransport::new(vec![
            Ok(page_response(0..3, None)),
            Ok(ApiResponse::default()),
        ]);
        let mut cats = collection(transport.clone());
        cats.fetch().await.expect("fetch should succeed");

        while cats.has_next_entity() {
            cats.next_entity();
        }
        let last = cats.last_entity().expect("page has entities").uuid();

        cats.destroy_entity(&last).await.expect("destroy should succeed");
        assert_eq!(cats.len(), 2);
        assert!(cats.entity_by_uuid(&last).is_none());
        assert!(!cats.has_next_entity());

        let requests = transport.requests();
        assert_eq!(requests[1].method, Method::Delete);
        assert_eq!(requests[1].path, format!("cats/{last}"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn add_entity_appends_server_record() {
        let created = json!({
            "entities": [{ "uuid": uuid_for(7), "type": "cat", "name": "newcat" }]
        });
        let transport = ScriptedTransport::new(vec![
            Ok(page_response(0..1, None)),
            Ok(serde_json::from_value(created).unwrap()),
        ]);
        let mut cats = collection(transport.clone());
        cats.fetch().await.expect("fetch should succeed");

        let mut properties = Map::new();
        properties.insert("name".to_string(), json!("newcat"));
        let entity = cats.add_entity(properties).await.expect("add should succeed");

        assert_eq!(entity.name(), Some("newcat"));
        assert_eq!(cats.len(), 2);
        assert_eq!(transport.requests()[1].method, Method::Post);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn snapshot_restores_into_equivalent_collection() {
        let transport = ScriptedTransport::new(vec![
            Ok(page_response(0..10, Some("c-1"))),
            Ok(page_response(10..20, Some("c-2"))),
            Ok(page_response(0..10, Some("c-1"))),
        ]);
        let mut cats = collection(transport.clone());
        cats.fetch().await.expect("page 1");
        cats.advance_page().await.expect("page 2");

        let state = cats.snapshot();
        let encoded = serde_json::to_string(&state).expect("state should serialize");
        let decoded: CollectionState =
            serde_json::from_str(&encoded).expect("state should deserialize");

        let mut restored =
            PagedCollection::from_state(transport, Arc::new(JsonEntityFactory), decoded);
        assert_eq!(restored.len(), 10);
        assert!(restored.has_previous_page());

        restored.retreat_page().await.expect("back to page 1");
        assert!(!restored.has_previous_page());
    }
}
