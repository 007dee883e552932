//! Request instrumentation middleware for axum routers.
//!
//! [`track_requests`] times every request under the aggregate
//! `routes.all.timer` and, when the request matched a declared route,
//! records the same elapsed time under a per-route timer
//! (`routes.root.<template>.<METHOD>.timer`) and marks a per-route
//! meter carrying the response status
//! (`routes.root.<template>.<METHOD>.<status>.meter`). A request no
//! route matched marks `routes.all.meter` instead, so unmatched
//! traffic stays visible without creating one name per concrete path.
//!
//! ```rust,ignore
//! use {argus_axum::track_requests, axum::middleware, std::sync::Arc};
//!
//! let app = router.layer(middleware::from_fn_with_state(
//!     Arc::clone(&metrics),
//!     track_requests,
//! ));
//! ```

use {
    argus_metrics::{Metrics, normalize},
    axum::{
        extract::{MatchedPath, Request, State},
        middleware::Next,
        response::Response,
    },
    std::{sync::Arc, time::Instant},
};

/// Times and counts one request; see the crate docs for the names
/// produced. Responses pass through untouched, error statuses
/// included.
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    // the matched template disappears with the request, capture it now
    let matched = request.extensions().get::<MatchedPath>().cloned();
    let method = request.method().as_str().to_owned();

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();

    metrics.route_timer(&["all"]).record(elapsed);
    match matched {
        Some(path) => {
            let route = normalize(path.as_str());
            let status = response.status().as_u16().to_string();
            metrics.route_timer(&["root", route.as_str(), method.as_str()]).record(elapsed);
            metrics
                .route_meter(&["root", route.as_str(), method.as_str(), status.as_str()])
                .mark();
        }
        None => metrics.route_meter(&["all"]).mark(),
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        argus_metrics::{Capabilities, MetricRegistry, MetricsConfig, ShutdownHooks},
        axum::{
            Router,
            body::Body,
            http::{Request as HttpRequest, StatusCode},
            middleware,
            routing::get,
        },
        std::collections::HashMap,
        tower::ServiceExt,
    };

    fn app() -> (Router, Arc<Metrics>) {
        let config = MetricsConfig::from_toml_str(
            r#"
            [metrics]
            prefix = "svc"
            "#,
        )
        .unwrap();
        let metrics = Metrics::start(
            config,
            Arc::new(MetricRegistry::new()),
            Capabilities::default(),
            &ShutdownHooks::new(),
        );
        let router = Router::new()
            .route("/foo/{firstId}/bar/{secondId}", get(|| async { "ok" }))
            .route("/fail", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .layer(middleware::from_fn_with_state(Arc::clone(&metrics), track_requests));
        (router, metrics)
    }

    fn counts(metrics: &Metrics) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        metrics.registry().visit_counters(|name, count| {
            counts.insert(name.to_owned(), count);
        });
        counts
    }

    fn timer_names(metrics: &Metrics) -> Vec<String> {
        let mut names = Vec::new();
        metrics.registry().drain_histograms(|name, samples| {
            if !samples.is_empty() {
                names.push(name.to_owned());
            }
        });
        names.sort();
        names
    }

    async fn send(router: &Router, path: &str) -> StatusCode {
        let response = router
            .clone()
            .oneshot(HttpRequest::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[tokio::test]
    async fn test_matched_request_updates_route_and_aggregate() {
        let (router, metrics) = app();
        assert_eq!(send(&router, "/foo/1/bar/2").await, StatusCode::OK);

        assert_eq!(
            timer_names(&metrics),
            vec![
                "svc.routes.all.timer",
                "svc.routes.root.foo._firstId.bar._secondId.GET.timer",
            ]
        );
        let counts = counts(&metrics);
        assert_eq!(
            counts.get("svc.routes.root.foo._firstId.bar._secondId.GET.200.meter"),
            Some(&1)
        );
        // matched traffic is not double counted in the aggregate meter
        assert_eq!(counts.get("svc.routes.all.meter"), None);
    }

    #[tokio::test]
    async fn test_unmatched_request_marks_the_aggregate_meter() {
        let (router, metrics) = app();
        assert_eq!(send(&router, "/nope").await, StatusCode::NOT_FOUND);

        assert_eq!(timer_names(&metrics), vec!["svc.routes.all.timer"]);
        let counts = counts(&metrics);
        assert_eq!(counts.get("svc.routes.all.meter"), Some(&1));
        assert_eq!(counts.len(), 1);
    }

    #[tokio::test]
    async fn test_error_responses_pass_through_and_are_counted() {
        let (router, metrics) = app();
        assert_eq!(send(&router, "/fail").await, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(send(&router, "/fail").await, StatusCode::INTERNAL_SERVER_ERROR);

        let counts = counts(&metrics);
        assert_eq!(counts.get("svc.routes.root.fail.GET.500.meter"), Some(&2));
    }
}
