//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use coletiva_chat::EnvelopeLimits;
use coletiva_db::DatabaseConfig;
use coletiva_observability::logging::{log_format_gueltig, log_level_gueltig};
use coletiva_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay-Einstellungen (Netzwerk, Grenzen)
    pub relay: RelayEinstellungen,
    /// Datenbank-Einstellungen
    pub datenbank: DatenbankEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Anzeigename des Relays
    pub name: String,
    /// Bind-Adresse fuer TCP
    pub bind_adresse: String,
    /// Port fuer TCP
    pub port: u16,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Inaktive Verbindungen werden nach dieser Zeit getrennt
    pub verbindungs_timeout_sek: u64,
    /// Broadcast-Queue pro Verbindung; voll = Verbindung wird verdraengt
    pub send_queue: usize,
    /// Maximale Groesse eines Envelopes in Bytes
    pub max_envelope_bytes: usize,
    /// Maximale Anzahl Empfaenger pro Envelope
    pub max_empfaenger: usize,
    /// Maximale Frame-Groesse auf dem Draht (Clients muessen sie teilen)
    pub max_frame_bytes: usize,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            name: relay.server_name,
            bind_adresse: "0.0.0.0".into(),
            port: 7337,
            max_clients: relay.max_clients,
            keepalive_sek: relay.keepalive_sek,
            verbindungs_timeout_sek: relay.verbindungs_timeout_sek,
            send_queue: relay.send_queue_groesse,
            max_envelope_bytes: relay.limits.max_envelope_bytes,
            max_empfaenger: relay.limits.max_empfaenger,
            max_frame_bytes: relay.max_frame_bytes,
        }
    }
}

/// Datenbank-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatenbankEinstellungen {
    /// Verbindungs-URL
    pub url: String,
    /// Maximale Verbindungspool-Groesse
    pub max_verbindungen: u32,
    /// WAL-Modus fuer SQLite
    pub sqlite_wal: bool,
    /// Intervall fuer den Health-Ping in Sekunden
    pub ping_intervall_sek: u64,
}

impl Default for DatenbankEinstellungen {
    fn default() -> Self {
        let db = DatabaseConfig::default();
        Self {
            url: db.url,
            max_verbindungen: db.max_verbindungen,
            sqlite_wal: db.sqlite_wal,
            ping_intervall_sek: 15,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Bind-Adresse fuer Metriken und Health
    pub bind_adresse: String,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: "127.0.0.1".into(),
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: impl AsRef<Path>) -> anyhow::Result<Self> {
        let pfad = pfad.as_ref();
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt).map_err(|e| {
                anyhow::anyhow!("Konfigurationsfehler in '{}': {e}", pfad.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = %pfad.display(),
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{}' nicht lesbar: {e}",
                    pfad.display()
                ))
            }
        };

        config.validieren()?;
        Ok(config)
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!("Ungueltiges Log-Level: '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Ungueltiges Log-Format: '{}'", self.logging.format);
        }
        if self.relay.max_clients == 0 {
            anyhow::bail!("relay.max_clients muss groesser als 0 sein");
        }
        if self.relay.send_queue == 0 {
            anyhow::bail!("relay.send_queue muss groesser als 0 sein");
        }
        if self.relay.keepalive_sek == 0
            || self.relay.verbindungs_timeout_sek <= self.relay.keepalive_sek
        {
            anyhow::bail!("relay.verbindungs_timeout_sek muss groesser als relay.keepalive_sek sein");
        }
        if self.relay.max_envelope_bytes == 0 || self.relay.max_empfaenger == 0 {
            anyhow::bail!("Envelope-Grenzen muessen groesser als 0 sein");
        }
        // Jeder angenommene Envelope muss einzeln in eine History-Antwort passen
        let relay = self.relay_config();
        let kodiert = relay.limits.max_kodierte_groesse();
        if kodiert > relay.history_budget() {
            anyhow::bail!(
                "relay.max_frame_bytes ({}) zu klein: ein Envelope an den Grenzen braucht kodiert bis zu {kodiert} Bytes",
                self.relay.max_frame_bytes
            );
        }
        self.relay_bind_adresse()?;
        if self.observability.aktiviert {
            self.observability_bind_adresse()?;
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer das Relay zurueck
    pub fn relay_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.relay.bind_adresse, self.relay.port);
        adresse
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Relay-Adresse '{adresse}': {e}"))
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        );
        adresse
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Observability-Adresse '{adresse}': {e}"))
    }

    /// Relay-Konfiguration fuer `coletiva-relay`
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            server_name: self.relay.name.clone(),
            max_clients: self.relay.max_clients,
            keepalive_sek: self.relay.keepalive_sek,
            verbindungs_timeout_sek: self.relay.verbindungs_timeout_sek,
            max_frame_bytes: self.relay.max_frame_bytes,
            send_queue_groesse: self.relay.send_queue,
            limits: EnvelopeLimits {
                max_envelope_bytes: self.relay.max_envelope_bytes,
                max_empfaenger: self.relay.max_empfaenger,
            },
        }
    }

    /// Datenbank-Konfiguration fuer `coletiva-db`
    pub fn datenbank_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.datenbank.url.clone(),
            max_verbindungen: self.datenbank.max_verbindungen,
            sqlite_wal: self.datenbank.sqlite_wal,
        }
    }
}
