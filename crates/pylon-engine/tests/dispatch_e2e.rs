//! End-to-end tests for request processing.
//!
//! These tests drive complete requests through the processor with in-memory
//! collaborators and check what reaches the error handler and the response.

use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use parking_lot::Mutex;
use pylon_engine::fixtures::{
    self, ErrorCall, EventLog, MapHandlerResolver, RecordingErrorHandler, RecordingFilter,
    StaticHandler, StaticResourceResolver,
};
use pylon_engine::{
    BufferedResponse, DispatchKind, DispatchOptions, EngineError, EngineSettings, ErrorChain,
    ErrorState, FilterChainType, FilterManager, FnFilter, FnHandler, RequestPathInfo,
    RequestProcessor, RequestSummary, Resource, Response, SettingsHandle, StaticResponseHeader,
    TelemetrySink,
};
use std::sync::Arc;

struct Harness {
    processor: RequestProcessor,
    filters: Arc<FilterManager>,
    errors: Arc<RecordingErrorHandler>,
    resources: StaticResourceResolver,
}

impl Harness {
    fn new(handlers: MapHandlerResolver, resources: StaticResourceResolver) -> Self {
        Self::with_settings(handlers, resources, EngineSettings::default())
    }

    fn with_settings(
        handlers: MapHandlerResolver,
        resources: StaticResourceResolver,
        settings: EngineSettings,
    ) -> Self {
        let filters = Arc::new(FilterManager::new());
        let errors = Arc::new(RecordingErrorHandler::default());
        let processor = RequestProcessor::builder()
            .filters(filters.clone())
            .handler_resolver(Arc::new(handlers))
            .error_handler(errors.clone())
            .settings(SettingsHandle::new(settings))
            .build();
        Self {
            processor,
            filters,
            errors,
            resources,
        }
    }

    async fn get(&self, path: &str) -> BufferedResponse {
        let mut response = BufferedResponse::new();
        self.processor
            .process_request(fixtures::request(path), &mut response, Some(&self.resources))
            .await
            .expect("no transport failure expected");
        response
    }
}

fn header(name: &'static str, value: &'static str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(name), HeaderValue::from_static(value))
}

// =============================================================================
// Failure mapping
// =============================================================================

#[tokio::test]
async fn test_missing_target_renders_404_with_message() {
    let harness = Harness::new(MapHandlerResolver::new(), StaticResourceResolver::new());

    let response = harness.get("/content/missing").await;

    assert_eq!(
        harness.errors.calls(),
        vec![ErrorCall::Status {
            status: StatusCode::NOT_FOUND,
            message: Some("/content/missing not found".to_string()),
        }]
    );
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plain_failure_reaches_error_handler_under_error_dispatch() {
    let harness = Harness::new(
        MapHandlerResolver::new().with(
            "test/boom",
            StaticHandler::failing("boom-handler", || EngineError::Other(anyhow::anyhow!("boom"))),
        ),
        StaticResourceResolver::new().with("/boom", "test/boom"),
    );

    let response = harness.get("/boom").await;

    assert_eq!(
        harness.errors.calls(),
        vec![ErrorCall::Failure {
            code: "UNCLASSIFIED",
            message: "boom".to_string(),
        }]
    );
    assert_eq!(harness.errors.dispatch_kinds(), vec![DispatchKind::Error]);
    assert_eq!(
        harness.errors.failed_handlers(),
        vec![Some("boom-handler".to_string())]
    );
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_dispatch_info_restored_after_error_render() {
    let seen = EventLog::default();
    let recorder = seen.clone();
    let handler = FnHandler::new("self-reporting", move |processor, ctx, response| {
        let recorder = recorder.clone();
        Box::pin(async move {
            recorder.push(format!("{:?}", ctx.dispatching_info().kind()));
            processor
                .handle_error(ctx, response, EngineError::Other(anyhow::anyhow!("boom")))
                .await?;
            recorder.push(format!("{:?}", ctx.dispatching_info().kind()));
            Ok(())
        })
    });
    let harness = Harness::new(
        MapHandlerResolver::new().with("test/page", handler),
        StaticResourceResolver::new().with("/page", "test/page"),
    );

    harness.get("/page").await;

    assert_eq!(seen.events(), vec!["Request", "Request"]);
    assert_eq!(harness.errors.dispatch_kinds(), vec![DispatchKind::Error]);
}

#[tokio::test]
async fn test_domain_chain_unwrapped_to_root_cause() {
    let harness = Harness::new(
        MapHandlerResolver::new().with(
            "test/nested",
            StaticHandler::failing("nested", || {
                let c = EngineError::Other(anyhow::anyhow!("C"));
                let b = EngineError::domain_with_cause("B", c);
                EngineError::domain_with_cause("A", b)
            }),
        ),
        StaticResourceResolver::new().with("/nested", "test/nested"),
    );

    harness.get("/nested").await;

    assert_eq!(
        harness.errors.calls(),
        vec![ErrorCall::Failure {
            code: "UNCLASSIFIED",
            message: "C".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_committed_response_skips_error_handling() {
    let handler = FnHandler::new("streaming", |_processor, _ctx, response| {
        Box::pin(async move {
            response.write_str("first chunk")?;
            response.flush_buffer()?;
            Err(EngineError::domain("stream broke"))
        })
    });
    let harness = Harness::new(
        MapHandlerResolver::new().with("test/stream", handler),
        StaticResourceResolver::new().with("/stream", "test/stream"),
    );

    let response = harness.get("/stream").await;

    assert!(harness.errors.calls().is_empty());
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body_text(), "first chunk");
}

#[tokio::test]
async fn test_nested_error_chain_does_not_render_twice() {
    let harness = Harness::new(
        MapHandlerResolver::new().with(
            "test/fail",
            StaticHandler::failing("fail", || EngineError::domain("outer failure")),
        ),
        StaticResourceResolver::new().with("/fail", "test/fail"),
    );
    let nested_handler = harness.errors.clone();
    harness.filters.register(
        FnFilter::new("re-entrant", move |ctx, response, next| {
            let handler = Arc::clone(&nested_handler);
            Box::pin(async move {
                let nested = ErrorChain::new(
                    Arc::from(Vec::new()),
                    ErrorState::status(StatusCode::INTERNAL_SERVER_ERROR, Some("nested")),
                    handler.as_ref(),
                );
                nested.run(ctx, response).await?;
                next.run(ctx, response).await
            })
        }),
        [FilterChainType::Error],
        0,
    );

    harness.get("/fail").await;

    assert_eq!(
        harness.errors.calls(),
        vec![ErrorCall::Failure {
            code: "DOMAIN",
            message: "outer failure".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_missing_services_bypass_filters() {
    let log = EventLog::default();
    let filters = Arc::new(FilterManager::new());
    filters.register(
        RecordingFilter::new("request", log.clone()),
        [FilterChainType::Request, FilterChainType::Error],
        0,
    );
    let processor = RequestProcessor::builder().filters(filters).build();
    let resources = StaticResourceResolver::new();

    let mut response = BufferedResponse::new();
    processor
        .process_request(fixtures::request("/a"), &mut response, Some(&resources))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body_text(), "Required service missing (HandlerResolver)");
    assert!(log.events().is_empty());
}

// =============================================================================
// Include / forward
// =============================================================================

fn including_handler(options: DispatchOptions) -> impl pylon_engine::Handler {
    FnHandler::new("outer", move |processor, ctx, response| {
        Box::pin(async move {
            let (name, value) = header("x", "1");
            response.set_header(name, value);
            response.write_str("<outer>")?;
            processor
                .dispatch_request(
                    ctx,
                    response,
                    Resource::new("/inner", "test/inner"),
                    RequestPathInfo::new("/inner").with_extension("html"),
                    options,
                )
                .await?;
            response.write_str("</outer>")
        })
    })
}

fn header_clobbering_handler() -> impl pylon_engine::Handler {
    FnHandler::new("inner", |_processor, _ctx, response| {
        Box::pin(async move {
            response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            let (name, value) = header("x", "2");
            response.set_header(name, value);
            response.write_str("inner")
        })
    })
}

#[tokio::test]
async fn test_include_with_header_protection_keeps_outer_headers() {
    let harness = Harness::new(
        MapHandlerResolver::new()
            .with(
                "test/outer",
                including_handler(DispatchOptions::include().with_protect_headers(true)),
            )
            .with("test/inner", header_clobbering_handler()),
        StaticResourceResolver::new().with("/outer", "test/outer"),
    );

    let response = harness.get("/outer").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x").unwrap(), "1");
    assert_eq!(response.body_text(), "<outer>inner</outer>");
}

#[tokio::test]
async fn test_include_without_protection_lets_headers_through() {
    let harness = Harness::new(
        MapHandlerResolver::new()
            .with("test/outer", including_handler(DispatchOptions::include()))
            .with("test/inner", header_clobbering_handler()),
        StaticResourceResolver::new().with("/outer", "test/outer"),
    );

    let response = harness.get("/outer").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers().get("x").unwrap(), "2");
}

#[tokio::test]
async fn test_chain_types_per_dispatch() {
    let harness = Harness::new(
        MapHandlerResolver::new()
            .with("test/outer", including_handler(DispatchOptions::include()))
            .with("test/inner", StaticHandler::new("inner", "inner")),
        StaticResourceResolver::new().with("/outer", "test/outer"),
    );
    let log = EventLog::default();
    for chain_type in FilterChainType::ALL {
        harness.filters.register(
            RecordingFilter::new(chain_type.name(), log.clone()),
            [chain_type],
            0,
        );
    }

    harness.get("/outer").await;

    assert_eq!(
        log.events(),
        vec![
            "REQUEST:before",
            "COMPONENT:before",
            "INCLUDE:before",
            "INCLUDE:after",
            "COMPONENT:after",
            "REQUEST:after",
        ]
    );
}

#[tokio::test]
async fn test_include_sees_its_own_frame_and_dispatch() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let inner = FnHandler::new("inner", move |_processor, ctx, _response| {
        let recorder = Arc::clone(&recorder);
        Box::pin(async move {
            let frame = ctx.active_frame().expect("frame");
            recorder.lock().push((
                frame.resource().path().to_string(),
                ctx.dispatching_info().kind(),
                ctx.dispatching_info().target().map(ToString::to_string),
                ctx.include_depth(),
                ctx.response_content_type().map(ToString::to_string),
            ));
            Ok(())
        })
    });
    let harness = Harness::new(
        MapHandlerResolver::new()
            .with("test/outer", including_handler(DispatchOptions::forward()))
            .with("test/inner", inner),
        StaticResourceResolver::new().with("/outer", "test/outer"),
    );

    harness.get("/outer").await;

    assert_eq!(
        *seen.lock(),
        vec![(
            "/inner".to_string(),
            DispatchKind::Forward,
            Some("/inner".to_string()),
            1,
            Some("text/html".to_string()),
        )]
    );
}

#[tokio::test]
async fn test_failure_inside_include_records_innermost_handler() {
    let harness = Harness::new(
        MapHandlerResolver::new()
            .with("test/outer", including_handler(DispatchOptions::include()))
            .with(
                "test/inner",
                StaticHandler::failing("inner", || EngineError::domain("inner broke")),
            ),
        StaticResourceResolver::new().with("/outer", "test/outer"),
    );

    harness.get("/outer").await;

    assert_eq!(harness.errors.failed_handlers(), vec![Some("inner".to_string())]);
}

#[tokio::test]
async fn test_include_of_unresolvable_target_is_404() {
    let harness = Harness::new(
        MapHandlerResolver::new().with("test/outer", including_handler(DispatchOptions::include())),
        StaticResourceResolver::new().with("/outer", "test/outer"),
    );

    harness.get("/outer").await;

    assert_eq!(
        harness.errors.calls(),
        vec![ErrorCall::Status {
            status: StatusCode::NOT_FOUND,
            message: Some("No handler found for /inner".to_string()),
        }]
    );
}

// =============================================================================
// Configuration and telemetry
// =============================================================================

#[tokio::test]
async fn test_additional_headers_applied() {
    let settings = EngineSettings::new().with_additional_response_headers(
        StaticResponseHeader::parse_all(["X-Frame-Options=SAMEORIGIN", "broken"]),
    );
    let harness = Harness::with_settings(
        MapHandlerResolver::new().with("test/page", StaticHandler::new("page", "ok")),
        StaticResourceResolver::new().with("/page", "test/page"),
        settings,
    );

    let response = harness.get("/page").await;

    assert_eq!(response.headers().get("x-frame-options").unwrap(), "SAMEORIGIN");
    assert_eq!(response.headers().len(), 1);
}

#[tokio::test]
async fn test_settings_change_applies_to_next_request() {
    let harness = Harness::new(
        MapHandlerResolver::new().with("test/page", StaticHandler::new("page", "ok")),
        StaticResourceResolver::new().with("/page", "test/page"),
    );
    assert!(harness.get("/page").await.headers().is_empty());

    harness.processor.settings().store(
        EngineSettings::new()
            .with_additional_response_headers(StaticResponseHeader::parse_all(["X-A=1"])),
    );

    assert_eq!(harness.get("/page").await.headers().get("x-a").unwrap(), "1");
}

#[derive(Default)]
struct RecordingSink {
    summaries: Mutex<Vec<RequestSummary>>,
}

impl TelemetrySink for RecordingSink {
    fn record(&self, summary: &RequestSummary) {
        self.summaries.lock().push(summary.clone());
    }
}

#[tokio::test]
async fn test_telemetry_recorded_for_every_outcome() {
    let sink = Arc::new(RecordingSink::default());
    let processor = RequestProcessor::builder()
        .handler_resolver(Arc::new(
            MapHandlerResolver::new().with("test/page", StaticHandler::new("page", "ok")),
        ))
        .error_handler(Arc::new(RecordingErrorHandler::default()))
        .telemetry(sink.clone())
        .build();
    let resources = StaticResourceResolver::new().with("/page", "test/page");

    for path in ["/page.html", "/missing"] {
        let mut response = BufferedResponse::new();
        processor
            .process_request(fixtures::request(path), &mut response, Some(&resources))
            .await
            .unwrap();
    }

    let summaries = sink.summaries.lock();
    assert_eq!(summaries.len(), 2);

    assert_eq!(summaries[0].status, 200);
    assert_eq!(summaries[0].handler_calls, 1);
    assert_eq!(summaries[0].error_chains, 0);
    let progress: Vec<_> = summaries[0].progress.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        progress,
        vec![
            "Applying REQUEST filters",
            "Applying COMPONENT filters",
            "Calling handler page",
            "Handler page finished",
        ]
    );

    assert_eq!(summaries[1].status, 404);
    assert_eq!(summaries[1].handler_calls, 0);
    assert_eq!(summaries[1].error_chains, 1);
}
