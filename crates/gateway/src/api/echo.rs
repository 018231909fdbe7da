//! `GET /echo?message=…`: plain-text answer from either the chat model or
//! an MCP tool, depending on `[echo].route`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value};

use tw_domain::config::EchoRoute;
use tw_domain::error::Error;

use crate::api::mcp_status;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EchoQuery {
    #[serde(default)]
    pub message: String,
}

pub async fn echo(State(state): State<AppState>, Query(query): Query<EchoQuery>) -> Response {
    match state.config.echo.route {
        EchoRoute::Model => via_model(&state, &query.message).await,
        EchoRoute::Tool => via_tool(&state, query.message).await,
    }
}

async fn via_model(state: &AppState, message: &str) -> Response {
    let Some(model) = &state.model else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no chat model configured").into_response();
    };

    match model.generate(message).await {
        Ok(text) => text.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, model = %model.model_id(), "chat model request failed");
            let status = match e {
                Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, "chat model request failed").into_response()
        }
    }
}

async fn via_tool(state: &AppState, message: String) -> Response {
    let Some(client) = &state.mcp else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no MCP server configured").into_response();
    };

    let tool = match &state.config.echo.tool {
        Some(name) => name.clone(),
        None => match client.tools().iter().next() {
            Some(first) => first.name.clone(),
            None => return (StatusCode::NOT_FOUND, "MCP server offers no tools").into_response(),
        },
    };

    let mut arguments = Map::new();
    arguments.insert(state.config.echo.argument.clone(), Value::String(message));

    match client.call_tool(&tool, Value::Object(arguments), None).await {
        Ok(result) if result.is_error => {
            tracing::warn!(tool = %tool, "tool reported an error");
            (StatusCode::BAD_GATEWAY, result.text()).into_response()
        }
        Ok(result) => result.text().into_response(),
        Err(e) => mcp_status(&e).into_response(),
    }
}
