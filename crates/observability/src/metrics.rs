//! Prometheus-kompatible Metriken fuer das Relay
//!
//! Registrierte Metriken:
//! - `coletiva_connected_clients` – Gauge: Aktuell verbundene Clients
//! - `coletiva_rooms_active` – Gauge: Raeume mit mindestens einem Mitglied
//! - `coletiva_envelopes_published_total` – Counter: Gespeicherte Envelopes
//! - `coletiva_broadcasts_delivered_total` – Counter: Zugestellte Broadcasts
//! - `coletiva_subscribers_evicted_total` – Counter: Wegen voller Queue getrennte Clients
//! - `coletiva_publish_duration_seconds` – Histogram: Persistenz + Fan-Out
//! - `coletiva_requests_total` – Counter: Control-Nachrichten nach Art

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Relay-Metriken
///
/// Clone teilt dieselbe Registry.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    pub connected_clients: IntGauge,
    pub rooms_active: IntGauge,
    pub envelopes_published_total: IntCounter,
    pub broadcasts_delivered_total: IntCounter,
    pub subscribers_evicted_total: IntCounter,
    pub publish_duration_seconds: Histogram,
    pub requests_total: IntCounterVec,
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "coletiva_connected_clients",
            "Anzahl aktuell verbundener Clients",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let rooms_active = IntGauge::with_opts(Opts::new(
            "coletiva_rooms_active",
            "Anzahl Raeume mit mindestens einem Mitglied",
        ))?;
        registry.register(Box::new(rooms_active.clone()))?;

        let envelopes_published_total = IntCounter::with_opts(Opts::new(
            "coletiva_envelopes_published_total",
            "Gesamtanzahl gespeicherter Envelopes",
        ))?;
        registry.register(Box::new(envelopes_published_total.clone()))?;

        let broadcasts_delivered_total = IntCounter::with_opts(Opts::new(
            "coletiva_broadcasts_delivered_total",
            "Gesamtanzahl eingereihter Broadcasts",
        ))?;
        registry.register(Box::new(broadcasts_delivered_total.clone()))?;

        let subscribers_evicted_total = IntCounter::with_opts(Opts::new(
            "coletiva_subscribers_evicted_total",
            "Clients die wegen voller Send-Queue getrennt wurden",
        ))?;
        registry.register(Box::new(subscribers_evicted_total.clone()))?;

        let publish_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "coletiva_publish_duration_seconds",
                "Dauer von Persistenz und Fan-Out in Sekunden",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]),
        )?;
        registry.register(Box::new(publish_duration_seconds.clone()))?;

        let requests_total = IntCounterVec::new(
            Opts::new(
                "coletiva_requests_total",
                "Gesamtanzahl empfangener Control-Nachrichten",
            ),
            &["art"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            rooms_active,
            envelopes_published_total,
            broadcasts_delivered_total,
            subscribers_evicted_total,
            publish_duration_seconds,
            requests_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
