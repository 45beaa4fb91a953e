//! Introspection of the resolved tenant.

use axum::Json;
use serde_json::{json, Value};

use crate::tenant::CurrentTenant;

/// `GET /api/tenant`: the tenant this request was routed to and why.
pub async fn current_tenant_handler(current: CurrentTenant) -> Json<Value> {
    Json(json!({
        "tenant": current.tenant,
        "source": current.source,
    }))
}
