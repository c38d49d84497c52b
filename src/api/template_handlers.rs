//! Template-service HTTP handlers (§6 "HTTP — template service"), backed
//! by C3's resolver for reads and C4's catalog writer for mutations.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::Result;
use crate::store::{Template, TemplateDto};

use super::responses::Reply;
use super::state::TemplateServiceState;

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GetTemplateQuery {
    #[serde(default = "default_language")]
    pub lang: String,
    pub version: Option<i32>,
}

/// `GET /templates/{code}?lang=..&version=..`.
pub async fn get_template(
    State(state): State<Arc<TemplateServiceState>>,
    Path(code): Path<String>,
    Query(query): Query<GetTemplateQuery>,
) -> Result<Reply<Template>> {
    let template = state
        .resolver
        .resolve(&code, &query.lang, query.version)
        .await?;
    Ok(Reply::new(StatusCode::OK, template))
}

/// `POST /templates`.
pub async fn create_template(
    State(state): State<Arc<TemplateServiceState>>,
    axum::Json(dto): axum::Json<TemplateDto>,
) -> Result<Reply<Template>> {
    let template = state.catalog.create(dto).await?;
    Ok(Reply::new(StatusCode::CREATED, template))
}

/// `PUT /templates/{code}`.
pub async fn update_template(
    State(state): State<Arc<TemplateServiceState>>,
    Path(code): Path<String>,
    axum::Json(dto): axum::Json<TemplateDto>,
) -> Result<Reply<Template>> {
    let template = state.catalog.update(&code, dto).await?;
    Ok(Reply::new(StatusCode::OK, template))
}

#[derive(Debug, Deserialize)]
pub struct DeleteTemplateQuery {
    #[serde(default = "default_language")]
    pub lang: String,
}

/// `DELETE /templates/{code}?lang=..`.
pub async fn delete_template(
    State(state): State<Arc<TemplateServiceState>>,
    Path(code): Path<String>,
    Query(query): Query<DeleteTemplateQuery>,
) -> Result<Reply<serde_json::Value>> {
    state.catalog.delete(&code, &query.lang).await?;
    Ok(Reply::new(StatusCode::OK, serde_json::json!({"deleted": true})))
}

const DEFAULT_PAGE_LIMIT: i64 = 10;
const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /templates?page=&limit=`, `limit` clamped to `(0, 100]` with a
/// default of 10, `page` 1-indexed.
pub async fn list_templates(
    State(state): State<Arc<TemplateServiceState>>,
    Query(query): Query<ListTemplatesQuery>,
) -> Result<Reply<Vec<Template>>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1) * limit;

    let templates = state.catalog.list(limit, offset).await?;
    Ok(Reply::new(StatusCode::OK, templates))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_one_has_zero_offset() {
        let limit: i64 = 10;
        let page: i64 = 1;
        assert_eq!((page - 1) * limit, 0);
    }

    #[test]
    fn limit_clamps_to_spec_max() {
        let limit = 500i64.clamp(1, MAX_PAGE_LIMIT);
        assert_eq!(limit, MAX_PAGE_LIMIT);
    }
}
