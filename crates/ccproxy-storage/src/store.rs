use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Schema,
};
use time::OffsetDateTime;

use crate::db::connect_shared;
use crate::entities;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Request half of a trace row.
#[derive(Debug, Clone)]
pub struct NewTrace {
    pub trace_id: String,
    pub traffic_type: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub request_headers: serde_json::Value,
    pub request_body: Option<Vec<u8>>,
    pub request_body_size: Option<i64>,
    pub request_content_type: Option<String>,
    pub start_time: OffsetDateTime,
}

/// Response (or error) half of a trace row.
#[derive(Debug, Clone)]
pub struct TraceCompletion {
    pub status_code: i32,
    pub response_headers: serde_json::Value,
    pub response_body: Option<Vec<u8>>,
    pub response_body_size: Option<i64>,
    pub response_content_type: Option<String>,
    pub duration_ms: Option<f64>,
    pub end_time: OffsetDateTime,
    pub error_message: Option<String>,
}

/// Persistence seam for the MITM addon. Failures are the caller's to
/// swallow; a live request never waits on a trace write succeeding.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn create_trace(&self, trace: NewTrace) -> StorageResult<()>;
    async fn complete_trace(&self, trace_id: &str, completion: TraceCompletion)
    -> StorageResult<()>;
}

#[derive(Clone)]
pub struct TraceStorage {
    db: DatabaseConnection,
}

impl TraceStorage {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = connect_shared(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync; run once at bootstrap.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Traces)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_traces(
        &self,
        page: u64,
        page_size: u64,
    ) -> StorageResult<(Vec<entities::traces::Model>, u64)> {
        use entities::traces::Column;

        let page = std::cmp::Ord::max(page, 1);
        let page_size = std::cmp::Ord::max(page_size, 1);
        let paginator = entities::Traces::find()
            .order_by_desc(Column::StartTime)
            .order_by_desc(Column::Id)
            .paginate(&self.db, page_size);
        let num_pages = paginator.num_pages().await?;
        let items = if num_pages == 0 || page > num_pages {
            Vec::new()
        } else {
            paginator.fetch_page(page - 1).await?
        };
        Ok((items, num_pages))
    }

    pub async fn get_trace(
        &self,
        trace_id: &str,
    ) -> StorageResult<Option<entities::traces::Model>> {
        Ok(entities::Traces::find()
            .filter(entities::traces::Column::TraceId.eq(trace_id))
            .one(&self.db)
            .await?)
    }
}

#[async_trait]
impl TraceStore for TraceStorage {
    async fn create_trace(&self, trace: NewTrace) -> StorageResult<()> {
        let active = entities::traces::ActiveModel {
            id: ActiveValue::NotSet,
            trace_id: ActiveValue::Set(trace.trace_id),
            traffic_type: ActiveValue::Set(trace.traffic_type),
            method: ActiveValue::Set(trace.method),
            url: ActiveValue::Set(trace.url),
            host: ActiveValue::Set(trace.host),
            path: ActiveValue::Set(trace.path),
            request_headers: ActiveValue::Set(trace.request_headers),
            request_body: ActiveValue::Set(trace.request_body),
            request_body_size: ActiveValue::Set(trace.request_body_size),
            request_content_type: ActiveValue::Set(trace.request_content_type),
            response_headers: ActiveValue::Set(None),
            response_body: ActiveValue::Set(None),
            response_body_size: ActiveValue::Set(None),
            response_content_type: ActiveValue::Set(None),
            status_code: ActiveValue::Set(None),
            start_time: ActiveValue::Set(trace.start_time),
            end_time: ActiveValue::Set(None),
            duration_ms: ActiveValue::Set(None),
            error_message: ActiveValue::Set(None),
        };
        entities::Traces::insert(active).exec(&self.db).await?;
        Ok(())
    }

    async fn complete_trace(
        &self,
        trace_id: &str,
        completion: TraceCompletion,
    ) -> StorageResult<()> {
        let Some(model) = self.get_trace(trace_id).await? else {
            // Request side was never captured (excluded host, late
            // startup); nothing to complete.
            return Ok(());
        };

        let mut active: entities::traces::ActiveModel = model.into();
        active.status_code = ActiveValue::Set(Some(completion.status_code));
        active.response_headers = ActiveValue::Set(Some(completion.response_headers));
        active.response_body = ActiveValue::Set(completion.response_body);
        active.response_body_size = ActiveValue::Set(completion.response_body_size);
        active.response_content_type = ActiveValue::Set(completion.response_content_type);
        active.duration_ms = ActiveValue::Set(completion.duration_ms);
        active.end_time = ActiveValue::Set(Some(completion.end_time));
        active.error_message = ActiveValue::Set(completion.error_message);
        active.update(&self.db).await?;
        Ok(())
    }
}
