use std::{collections::HashMap, convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc};

use askama::Template;
use async_graphql::http::GraphiQLSource;
use async_graphql_warp::GraphQLResponse;
use tracing::{info, warn};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use crate::{
    api::Schema,
    dashboard::Dashboard,
    error::Error,
    render::{DashboardPage, ErrorPage},
    session::DashboardState,
};

/// Certificate and key paths for serving HTTPS.
pub(crate) struct Tls {
    pub(crate) cert: PathBuf,
    pub(crate) key: PathBuf,
}

/// Runs the web server until the process exits.
pub(crate) async fn serve(
    schema: Schema,
    dashboard: Arc<Dashboard>,
    addr: SocketAddr,
    tls: Option<Tls>,
) {
    let server = warp::serve(routes(schema, dashboard));
    match tls {
        Some(tls) => {
            info!("Listening on https://{addr}");
            server
                .tls()
                .cert_path(tls.cert)
                .key_path(tls.key)
                .run(addr)
                .await;
        }
        None => {
            info!("Listening on http://{addr}");
            server.run(addr).await;
        }
    }
}

pub(crate) fn routes(
    schema: Schema,
    dashboard: Arc<Dashboard>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let page = warp::get()
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::any().map(move || Arc::clone(&dashboard)))
        .and_then(|params: HashMap<String, String>, dashboard: Arc<Dashboard>| async move {
            let (status, body) = dashboard_page(&dashboard, &params).await;
            Ok::<_, Infallible>(warp::reply::with_status(warp::reply::html(body), status))
        });

    let graphql = warp::path!("graphql")
        .and(warp::post())
        .and(async_graphql_warp::graphql(schema))
        .and_then(
            |(schema, request): (Schema, async_graphql::Request)| async move {
                Ok::<_, Infallible>(GraphQLResponse::from(schema.execute(request).await))
            },
        );

    let playground = warp::path!("graphql" / "playground")
        .and(warp::get())
        .map(|| warp::reply::html(GraphiQLSource::build().endpoint("/graphql").finish()));

    page.or(graphql).or(playground)
}

/// Builds and renders the dashboard for the URL parameters.
async fn dashboard_page(
    dashboard: &Dashboard,
    params: &HashMap<String, String>,
) -> (StatusCode, String) {
    let state = DashboardState::from_query(params, dashboard.defaults());
    match dashboard.build(state).await {
        Ok(view) => (StatusCode::OK, render(&DashboardPage::new(&view))),
        Err(e) => {
            warn!("Problem while building dashboard. {e}");
            let status = match e {
                Error::Configuration(_) | Error::Validation { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let page = ErrorPage {
                message: e.to_string(),
            };
            (status, render(&page))
        }
    }
}

fn render(template: &impl Template) -> String {
    template
        .render()
        .unwrap_or_else(|e| format!("Template error: {e}"))
}
