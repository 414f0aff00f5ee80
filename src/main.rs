mod address;
mod apps_script;
mod calendar;
mod config;
mod error;
mod extract;
mod handlers;
mod orchestrator;
mod phone;
mod sinks;
mod stores;
mod tasks;
mod tools;
mod types;
mod urgency;
mod vapi_types;

use crate::calendar::{AvailabilityLookup, CalendarClient};
use crate::config::Config;
use crate::extract::Extractor;
use crate::orchestrator::Orchestrator;
use crate::stores::{AppointmentStore, IdempotencyStore, InMemoryAppointments, InMemoryIdempotency};
use crate::types::AppState;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const SERVICE_NAME: &str = "lead-relay";
    pub const MAX_SUMMARY_CHARS: usize = 500;
    pub const MAX_TRANSCRIPT_CHARS: usize = 5_000;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("lead_relay", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;

    let config = Config::from_env().context("reading configuration")?;
    let http_client = reqwest::Client::builder()
        .timeout(config.sink_timeout)
        .build()
        .context("building http client")?;

    let calendar_client = config.calendar.as_ref().map(|calendar| {
        Arc::new(CalendarClient::new(
            http_client.clone(),
            calendar,
            &config.business_time_zone,
            config.business_offset,
            config.appointment_duration,
        ))
    });
    let sinks = sinks::build_sinks(&config, &http_client, calendar_client.clone());

    let processed: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotency::new());
    let appointments: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointments::new());
    if let Some(ttl) = config.store_ttl {
        tasks::spawn_store_sweeper(processed.clone(), appointments.clone(), ttl);
    }

    let orchestrator = Orchestrator::new(
        Extractor::new(&config.default_city),
        sinks,
        processed.clone(),
        appointments.clone(),
        config.sink_timeout,
    );
    info!(sinks=?orchestrator.sink_kinds(), "dispatch order");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app_state = Arc::new(AppState {
        config,
        orchestrator,
        appointments,
        processed,
        availability: calendar_client.map(|c| c as Arc<dyn AvailabilityLookup>),
    });

    let app = Router::new()
        .route("/", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/webhook", post(handlers::webhook))
        .route("/check-availability", post(handlers::check_availability))
        .route("/book-appointment", post(handlers::book_appointment))
        .route("/cancel-appointment", post(handlers::cancel_appointment))
        .route("/reschedule-appointment", post(handlers::reschedule_appointment))
        .route("/test", post(handlers::test_all))
        .route("/test/:sink", post(handlers::test_sink))
        .with_state(app_state);

    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("server error")?;
    Ok(())
}
