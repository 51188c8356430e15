use std::sync::Arc;

use serde_json::{Map, Value};

use crate::collection::{PagedCollection, join_path};
use crate::entity::{Entity, EntityFactory, JsonEntityFactory};
use crate::error::{ClientError, ClientResult};
use crate::query::Query;
use crate::transport::{ApiRequest, Transport};

/// Entry point for application code.
///
/// A client is an explicit value: construct one, pass it around, drop it.
/// There is no module-level default instance; session state such as the
/// bearer token lives in the transport it was built with.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    factory: Arc<dyn EntityFactory>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_factory(transport, Arc::new(JsonEntityFactory))
    }

    /// Build a client with a custom entity factory, for callers that
    /// materialize domain-specific entity types.
    pub fn with_factory(transport: Arc<dyn Transport>, factory: Arc<dyn EntityFactory>) -> Self {
        Self { transport, factory }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// A collection view with empty local state. No request is issued until
    /// the caller drives `fetch()`.
    pub fn collection(&self, resource_path: impl Into<String>, query: Query) -> PagedCollection {
        PagedCollection::new(
            self.transport.clone(),
            self.factory.clone(),
            resource_path,
            query,
        )
    }

    /// A collection view with its first page loaded.
    pub async fn fetch_collection(
        &self,
        resource_path: impl Into<String>,
        query: Query,
    ) -> ClientResult<PagedCollection> {
        let mut collection = self.collection(resource_path, query);
        collection.fetch().await?;
        Ok(collection)
    }

    /// Fetch one entity by uuid or name.
    pub async fn get_entity(&self, resource_path: &str, id: &str) -> ClientResult<Entity> {
        let path = join_path(resource_path, id);
        let response = self.transport.send(ApiRequest::get(&path)).await?;
        let record = response
            .first_entity()
            .ok_or_else(|| ClientError::MissingEntity { path })?;
        Ok(self.factory.build(record, resource_type_of(resource_path))?)
    }

    /// Create an entity and return the server's materialized record.
    pub async fn create_entity(
        &self,
        resource_path: &str,
        properties: Map<String, Value>,
    ) -> ClientResult<Entity> {
        let request = ApiRequest::post(resource_path, Value::Object(properties));
        let response = self.transport.send(request).await?;
        let record = response
            .first_entity()
            .ok_or_else(|| ClientError::MissingEntity {
                path: resource_path.to_string(),
            })?;
        Ok(self.factory.build(record, resource_type_of(resource_path))?)
    }

    /// Save an entity's local attributes back to the server.
    ///
    /// On success the entity is overwritten wholesale from the response
    /// record (server timestamps included); a response without a record
    /// leaves the local value as sent.
    pub async fn save_entity(&self, resource_path: &str, entity: &mut Entity) -> ClientResult<()> {
        let path = join_path(resource_path, &entity.uuid().to_string());
        let request = ApiRequest::put(path, entity.to_value());
        let response = self.transport.send(request).await?;
        if let Some(record) = response.first_entity() {
            entity.replace_from_record(record)?;
        }
        Ok(())
    }

    /// Delete one entity by uuid or name.
    pub async fn delete_entity(&self, resource_path: &str, id: &str) -> ClientResult<()> {
        let path = join_path(resource_path, id);
        self.transport.send(ApiRequest::delete(path)).await?;
        Ok(())
    }
}

fn resource_type_of(resource_path: &str) -> &str {
    resource_path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(resource_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use serde_json::json;

    fn seeded_client() -> (Client, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        transport.seed(
            "cats",
            vec![
                json!({ "name": "enzo", "color": "orange" }),
                json!({ "name": "bertha", "color": "gray" }),
            ],
        );
        (Client::new(transport.clone()), transport)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_then_get_round_trips_an_entity() {
        let (client, _transport) = seeded_client();

        let mut properties = Map::new();
        properties.insert("name".to_string(), json!("newcat"));
        let created = client
            .create_entity("cats", properties)
            .await
            .expect("create should succeed");
        assert_eq!(created.name(), Some("newcat"));
        assert!(created.created().is_some());

        let fetched = client
            .get_entity("cats", &created.uuid().to_string())
            .await
            .expect("get should succeed");
        assert_eq!(fetched.uuid(), created.uuid());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn save_entity_replaces_local_state_from_response() {
        let (client, _transport) = seeded_client();
        let mut collection = client
            .fetch_collection("cats", Query::new())
            .await
            .expect("fetch should succeed");
        let mut enzo = collection
            .entities()
            .iter()
            .find(|e| e.name() == Some("enzo"))
            .expect("seeded entity present")
            .clone();

        enzo.set("color", json!("cream"));
        enzo.set("draft_marker", json!(true));
        client
            .save_entity("cats", &mut enzo)
            .await
            .expect("save should succeed");

        // The response record, not the local draft, is the new truth.
        assert_eq!(enzo.get_str("color"), Some("cream"));
        assert!(enzo.modified().is_some());

        let fetched = client
            .get_entity("cats", &enzo.uuid().to_string())
            .await
            .expect("get should succeed");
        assert_eq!(fetched.get_str("color"), Some("cream"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn get_entity_for_unknown_id_is_not_found() {
        let (client, _transport) = seeded_client();
        let err = client
            .get_entity("cats", "00000000-0000-4000-8000-999999999999")
            .await
            .expect_err("unknown entity");
        assert!(matches!(
            err,
            ClientError::Transport(crate::transport::TransportError::NotFound { .. })
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_entity_removes_it_from_subsequent_pages() {
        let (client, _transport) = seeded_client();
        let collection = client
            .fetch_collection("cats", Query::new())
            .await
            .expect("fetch should succeed");
        let target = collection.first_entity().expect("seeded page").uuid();

        client
            .delete_entity("cats", &target.to_string())
            .await
            .expect("delete should succeed");

        let collection = client
            .fetch_collection("cats", Query::new())
            .await
            .expect("refetch should succeed");
        assert_eq!(collection.len(), 1);
        assert!(collection.entity_by_uuid(&target).is_none());
    }
}
