use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One intercepted HTTP flow: request fields at creation, response (or
/// error) fields on completion.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "traces")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub trace_id: String,
    pub traffic_type: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub request_headers: Json,
    pub request_body: Option<Vec<u8>>,
    pub request_body_size: Option<i64>,
    pub request_content_type: Option<String>,
    pub response_headers: Option<Json>,
    pub response_body: Option<Vec<u8>>,
    pub response_body_size: Option<i64>,
    pub response_content_type: Option<String>,
    pub status_code: Option<i32>,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration_ms: Option<f64>,
    pub error_message: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
