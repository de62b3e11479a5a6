use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::{anyhow, Result};
use axum::{
    extract::{ConnectInfo, State},
    http::{
        header::{CONTENT_TYPE, USER_AGENT},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
};
use calproxy_core::metrics::{Metrics, Outcome};
use tracing::{error, info};

use crate::route::AppState;

/// Handle calendar requests.
///
/// Responds with the merged calendar, or with an empty `500` if the upstream index cannot be
/// read.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let started = Instant::now();
    let user_agent = header(&headers, USER_AGENT.as_str()).unwrap_or("-").to_owned();
    let remote = header(&headers, "x-forwarded-for")
        .map(String::from)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.to_string()))
        .unwrap_or_else(|| String::from("-"));

    match get_calendar(&state).await {
        Ok(calendar) => {
            info!(%user_agent, %remote, dur = ?started.elapsed(), "served calendar");
            state.counters.inbound_request(Outcome::Ok);
            Ok(([(CONTENT_TYPE, "text/calendar")], calendar).into_response())
        }
        Err(err) => {
            error!(
                %user_agent,
                %remote,
                dur = ?started.elapsed(),
                error = %format!("{err:#}"),
                "failed to serve calendar"
            );
            state.counters.inbound_request(Outcome::Err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_calendar(state: &AppState) -> Result<String> {
    match tokio::time::timeout(state.request_timeout, state.pipeline.run()).await {
        Ok(calendar) => Ok(calendar?),
        Err(elapsed) => Err(anyhow!(elapsed).context("request deadline")),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
