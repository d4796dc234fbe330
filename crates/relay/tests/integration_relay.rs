//! Integration-Tests fuer das Relay ueber echte TCP-Verbindungen
//!
//! Das Relay laeuft in einem eigenen Thread mit eigener Runtime und
//! In-Memory-SQLite. Die Tests sprechen das Wire-Protokoll direkt.

use chrono::Utc;
use coletiva_core::{EnvelopeId, ParticipantId, RoomId};
use coletiva_db::SqliteDb;
use coletiva_observability::RelayMetrics;
use coletiva_protocol::control::{
    ControlPayload, HelloRequest, HistoryRequest, KeyListRequest, KeyRegisterRequest,
    PublishRequest, RoomJoinRequest, RoomLeaveRequest,
};
use coletiva_protocol::{
    ControlCodec, ControlMessage, Envelope, EnvelopeMeta, ErrorCode, PayloadAlgorithm, WrappedKey,
};
use coletiva_relay::{RelayConfig, RelayServer, RelayState};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;

type Verbindung = Framed<TcpStream, ControlCodec>;

const WARTEZEIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Test-Relay
// ---------------------------------------------------------------------------

struct TestRelay {
    addr: SocketAddr,
    state: Arc<RelayState<SqliteDb>>,
    shutdown: watch::Sender<bool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TestRelay {
    fn starten(config: RelayConfig) -> Self {
        let (bereit_tx, bereit_rx) = std::sync::mpsc::channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let db = Arc::new(SqliteDb::in_memory().await.unwrap());
                let state = RelayState::neu(config, db, RelayMetrics::neu().unwrap());
                let server = RelayServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
                    .await
                    .unwrap();
                bereit_tx
                    .send((server.lokale_adresse().unwrap(), state))
                    .unwrap();
                server.starten(shutdown_rx).await.unwrap();
            });
        });

        let (addr, state) = bereit_rx.recv().unwrap();
        Self {
            addr,
            state,
            shutdown,
            thread: Some(thread),
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

async fn verbinden(addr: SocketAddr) -> Verbindung {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, ControlCodec::new())
}

async fn lesen(verbindung: &mut Verbindung) -> ControlMessage {
    tokio::time::timeout(WARTEZEIT, verbindung.next())
        .await
        .expect("Timeout beim Lesen")
        .expect("Verbindung geschlossen")
        .expect("Frame-Fehler")
}

async fn anfrage(verbindung: &mut Verbindung, request_id: u32, payload: ControlPayload) -> ControlPayload {
    verbindung
        .send(ControlMessage::new(request_id, payload))
        .await
        .unwrap();
    loop {
        let antwort = lesen(verbindung).await;
        if antwort.request_id == request_id {
            return antwort.payload;
        }
    }
}

async fn hallo(addr: SocketAddr, name: &str) -> Verbindung {
    let mut verbindung = verbinden(addr).await;
    let antwort = anfrage(
        &mut verbindung,
        1,
        ControlPayload::Hello(HelloRequest {
            participant_id: ParticipantId::new(name),
            client_version: "test".into(),
        }),
    )
    .await;
    assert!(matches!(antwort, ControlPayload::HelloResponse(_)), "{antwort:?}");
    verbindung
}

async fn beitreten(verbindung: &mut Verbindung, raum: &str) -> usize {
    match anfrage(
        verbindung,
        2,
        ControlPayload::RoomJoin(RoomJoinRequest {
            room_id: RoomId::new(raum),
        }),
    )
    .await
    {
        ControlPayload::RoomJoinResponse(r) => r.mitglieder,
        andere => panic!("Unerwartete Antwort: {andere:?}"),
    }
}

fn envelope(sender: &str, groesse: usize, marker: u8) -> Envelope {
    Envelope {
        id: EnvelopeId::new(),
        room_id: None,
        algorithm: PayloadAlgorithm::Aes256Gcm,
        nonce: [marker; 12],
        ciphertext: vec![marker; groesse],
        keys: vec![WrappedKey {
            recipient: ParticipantId::new("bob"),
            wrapped_key: vec![marker; 48],
        }],
        meta: EnvelopeMeta {
            sender_id: ParticipantId::new(sender),
            created_at: Utc::now(),
        },
    }
}

fn publish(raum: &str, env: Envelope) -> ControlPayload {
    ControlPayload::Publish(PublishRequest {
        room_id: RoomId::new(raum),
        envelope: env,
    })
}

fn fehler_code(payload: &ControlPayload) -> ErrorCode {
    match payload {
        ControlPayload::Error(e) => e.code,
        andere => panic!("Fehler erwartet, erhalten: {andere:?}"),
    }
}

async fn broadcast_lesen(verbindung: &mut Verbindung) -> (RoomId, Envelope) {
    loop {
        let nachricht = lesen(verbindung).await;
        if let ControlPayload::Broadcast(b) = nachricht.payload {
            return (b.room_id, b.envelope);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_erreicht_andere_mitglieder_aber_nicht_den_absender() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;
    let mut bob = hallo(relay.addr, "bob").await;

    assert_eq!(beitreten(&mut alice, "lobby").await, 1);
    assert_eq!(beitreten(&mut bob, "lobby").await, 2);

    let env = envelope("alice", 64, 7);
    let antwort = anfrage(&mut alice, 10, publish("lobby", env.clone())).await;
    match antwort {
        ControlPayload::PublishResponse(r) => {
            assert_eq!(r.envelope_id, env.id);
            assert_eq!(r.zugestellt, 1);
        }
        andere => panic!("Unerwartete Antwort: {andere:?}"),
    }

    let (raum, empfangen) = broadcast_lesen(&mut bob).await;
    assert_eq!(raum, RoomId::new("lobby"));
    assert_eq!(empfangen.id, env.id);
    assert_eq!(empfangen.ciphertext, env.ciphertext);
    assert_eq!(empfangen.room_id, Some(RoomId::new("lobby")));

    // Alice bekommt keinen Broadcast ihres eigenen Envelopes
    let ping = anfrage(&mut alice, 11, ControlPayload::Ping(coletiva_protocol::control::PingMessage { timestamp_ms: 1 })).await;
    assert!(matches!(ping, ControlPayload::Pong(_)));
}

#[tokio::test]
async fn raeume_sind_isoliert() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;
    let mut bob = hallo(relay.addr, "bob").await;
    let mut carol = hallo(relay.addr, "carol").await;

    beitreten(&mut alice, "a").await;
    beitreten(&mut bob, "a").await;
    beitreten(&mut carol, "b").await;

    let antwort = anfrage(&mut alice, 10, publish("a", envelope("alice", 16, 1))).await;
    assert!(matches!(antwort, ControlPayload::PublishResponse(ref r) if r.zugestellt == 1));

    broadcast_lesen(&mut bob).await;
    let nichts = tokio::time::timeout(Duration::from_millis(200), carol.next()).await;
    assert!(nichts.is_err(), "Carol in Raum b darf nichts empfangen");
}

#[tokio::test]
async fn zustellreihenfolge_entspricht_empfangsreihenfolge() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;
    let mut bob = hallo(relay.addr, "bob").await;
    let mut beobachter = hallo(relay.addr, "carol").await;

    beitreten(&mut alice, "lobby").await;
    beitreten(&mut bob, "lobby").await;
    beitreten(&mut beobachter, "lobby").await;

    // Beide senden ohne auf Antworten zu warten
    let mut gesendet = Vec::new();
    for i in 0..20u8 {
        let (verbindung, name) = if i % 2 == 0 {
            (&mut alice, "alice")
        } else {
            (&mut bob, "bob")
        };
        let env = envelope(name, 8, i);
        gesendet.push(env.id);
        verbindung
            .send(ControlMessage::new(100 + u32::from(i), publish("lobby", env)))
            .await
            .unwrap();
    }

    let mut empfangen = Vec::new();
    while empfangen.len() < gesendet.len() {
        let (_, env) = broadcast_lesen(&mut beobachter).await;
        empfangen.push(env.id);
    }

    // Reihenfolge pro Absender bleibt erhalten
    let von_alice: Vec<_> = gesendet.iter().step_by(2).copied().collect();
    let alice_empfangen: Vec<_> = empfangen
        .iter()
        .filter(|id| von_alice.contains(id))
        .copied()
        .collect();
    assert_eq!(alice_empfangen, von_alice);

    // Gesamtreihenfolge entspricht der gespeicherten History
    let history = anfrage(
        &mut beobachter,
        500,
        ControlPayload::History(HistoryRequest {
            room_id: RoomId::new("lobby"),
            before_seq: None,
            limit: Some(100),
        }),
    )
    .await;
    match history {
        ControlPayload::HistoryResponse(r) => {
            let ids: Vec<_> = r.envelopes.iter().map(|e| e.id).collect();
            assert_eq!(ids, empfangen);
        }
        andere => panic!("Unerwartete Antwort: {andere:?}"),
    }
}

#[tokio::test]
async fn publish_ohne_beitritt_wird_abgelehnt() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;

    let antwort = anfrage(&mut alice, 10, publish("lobby", envelope("alice", 8, 1))).await;
    assert_eq!(fehler_code(&antwort), ErrorCode::NotJoined);

    let mut anonym = verbinden(relay.addr).await;
    let antwort = anfrage(
        &mut anonym,
        1,
        ControlPayload::RoomJoin(RoomJoinRequest {
            room_id: RoomId::new("lobby"),
        }),
    )
    .await;
    assert_eq!(fehler_code(&antwort), ErrorCode::NotAuthenticated);
}

#[tokio::test]
async fn fremder_absender_wird_abgelehnt() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut mallory = hallo(relay.addr, "mallory").await;
    beitreten(&mut mallory, "lobby").await;

    let antwort = anfrage(&mut mallory, 10, publish("lobby", envelope("alice", 8, 1))).await;
    assert_eq!(fehler_code(&antwort), ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn zu_grosser_envelope_wird_abgelehnt() {
    let mut config = RelayConfig::default();
    config.limits.max_envelope_bytes = 1024;
    let relay = TestRelay::starten(config);
    let mut alice = hallo(relay.addr, "alice").await;
    beitreten(&mut alice, "lobby").await;

    let antwort = anfrage(&mut alice, 10, publish("lobby", envelope("alice", 4096, 1))).await;
    assert_eq!(fehler_code(&antwort), ErrorCode::PayloadTooLarge);
}

#[tokio::test]
async fn leave_beendet_zustellung_und_ist_ohne_beitritt_noop() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;
    let mut bob = hallo(relay.addr, "bob").await;
    beitreten(&mut alice, "lobby").await;
    beitreten(&mut bob, "lobby").await;

    let leave = |raum: &str| {
        ControlPayload::RoomLeave(RoomLeaveRequest {
            room_id: RoomId::new(raum),
        })
    };

    match anfrage(&mut bob, 3, leave("lobby")).await {
        ControlPayload::RoomLeaveResponse(r) => assert!(r.war_beigetreten),
        andere => panic!("Unerwartete Antwort: {andere:?}"),
    }
    match anfrage(&mut bob, 4, leave("lobby")).await {
        ControlPayload::RoomLeaveResponse(r) => assert!(!r.war_beigetreten),
        andere => panic!("Unerwartete Antwort: {andere:?}"),
    }

    let antwort = anfrage(&mut alice, 10, publish("lobby", envelope("alice", 8, 1))).await;
    assert!(matches!(antwort, ControlPayload::PublishResponse(ref r) if r.zugestellt == 0));
}

#[tokio::test]
async fn history_ist_nur_fuer_mitglieder_und_aelteste_zuerst() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;
    beitreten(&mut alice, "lobby").await;

    let mut ids = Vec::new();
    for i in 0..5u8 {
        let env = envelope("alice", 8, i);
        ids.push(env.id);
        anfrage(&mut alice, 10 + u32::from(i), publish("lobby", env)).await;
    }

    let history = |limit| {
        ControlPayload::History(HistoryRequest {
            room_id: RoomId::new("lobby"),
            before_seq: None,
            limit,
        })
    };

    match anfrage(&mut alice, 50, history(Some(3))).await {
        ControlPayload::HistoryResponse(r) => {
            let geladen: Vec<_> = r.envelopes.iter().map(|e| e.id).collect();
            assert_eq!(geladen, ids[2..].to_vec());
        }
        andere => panic!("Unerwartete Antwort: {andere:?}"),
    }

    let mut bob = hallo(relay.addr, "bob").await;
    let antwort = anfrage(&mut bob, 5, history(None)).await;
    assert_eq!(fehler_code(&antwort), ErrorCode::NotJoined);
}

#[tokio::test]
async fn history_grosser_envelopes_passt_in_frames_und_blaettert() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;
    beitreten(&mut alice, "lobby").await;

    let mut ids = Vec::new();
    for i in 0..5u8 {
        let env = envelope("alice", 200 * 1024, i);
        ids.push(env.id);
        let antwort = anfrage(&mut alice, 10 + u32::from(i), publish("lobby", env)).await;
        assert!(matches!(antwort, ControlPayload::PublishResponse(_)), "{antwort:?}");
    }

    let mut geladen = Vec::new();
    let mut cursor = None;
    let mut seiten = 0;
    loop {
        let antwort = anfrage(
            &mut alice,
            100 + seiten,
            ControlPayload::History(HistoryRequest {
                room_id: RoomId::new("lobby"),
                before_seq: cursor,
                limit: None,
            }),
        )
        .await;
        let seite = match antwort {
            ControlPayload::HistoryResponse(r) => r,
            andere => panic!("Unerwartete Antwort: {andere:?}"),
        };
        seiten += 1;
        assert!(seite.envelopes.len() < 5);

        let mut ids_der_seite: Vec<_> = seite.envelopes.iter().map(|e| e.id).collect();
        ids_der_seite.append(&mut geladen);
        geladen = ids_der_seite;

        match seite.weitere_vor {
            Some(seq) => cursor = Some(seq),
            None => break,
        }
    }

    assert!(seiten > 1);
    assert_eq!(geladen, ids);

    // Verbindung ist weiter nutzbar
    let antwort = anfrage(&mut alice, 900, publish("lobby", envelope("alice", 8, 9))).await;
    assert!(matches!(antwort, ControlPayload::PublishResponse(_)), "{antwort:?}");
}

#[tokio::test]
async fn register_nur_fuer_eigene_identitaet() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;
    let schluessel = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=".to_string();

    let antwort = anfrage(
        &mut alice,
        5,
        ControlPayload::KeyRegister(KeyRegisterRequest {
            participant_id: ParticipantId::new("alice"),
            public_key: schluessel.clone(),
        }),
    )
    .await;
    assert!(matches!(antwort, ControlPayload::KeyRegisterResponse { .. }), "{antwort:?}");

    let antwort = anfrage(
        &mut alice,
        6,
        ControlPayload::KeyRegister(KeyRegisterRequest {
            participant_id: ParticipantId::new("bob"),
            public_key: schluessel.clone(),
        }),
    )
    .await;
    assert_eq!(fehler_code(&antwort), ErrorCode::PermissionDenied);

    let antwort = anfrage(
        &mut alice,
        7,
        ControlPayload::KeyRegister(KeyRegisterRequest {
            participant_id: ParticipantId::new("alice"),
            public_key: "kein-base64".into(),
        }),
    )
    .await;
    assert_eq!(fehler_code(&antwort), ErrorCode::InvalidRequest);

    match anfrage(&mut alice, 8, ControlPayload::KeyList(KeyListRequest::default())).await {
        ControlPayload::KeyListResponse(r) => {
            assert_eq!(r.entries.len(), 1);
            assert_eq!(r.entries[0].participant_id, ParticipantId::new("alice"));
            assert_eq!(r.entries[0].public_key, schluessel);
        }
        andere => panic!("Unerwartete Antwort: {andere:?}"),
    }
}

#[tokio::test]
async fn doppeltes_hello_wird_abgelehnt_und_logout_erlaubt_neues() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;

    let hello = |name: &str| {
        ControlPayload::Hello(HelloRequest {
            participant_id: ParticipantId::new(name),
            client_version: "test".into(),
        })
    };

    let antwort = anfrage(&mut alice, 2, hello("alice")).await;
    assert_eq!(fehler_code(&antwort), ErrorCode::AlreadyAuthenticated);

    let antwort = anfrage(&mut alice, 3, ControlPayload::Logout).await;
    assert!(matches!(antwort, ControlPayload::LogoutResponse));

    let antwort = anfrage(&mut alice, 4, hello("alice2")).await;
    assert!(matches!(antwort, ControlPayload::HelloResponse(ref r) if r.participant_id == ParticipantId::new("alice2")));
}

#[tokio::test]
async fn langsamer_client_wird_verdraengt_ohne_den_absender_zu_blockieren() {
    let config = RelayConfig {
        send_queue_groesse: 4,
        ..RelayConfig::default()
    };
    let relay = TestRelay::starten(config);
    let mut alice = hallo(relay.addr, "alice").await;
    let mut langsam = hallo(relay.addr, "bob").await;
    beitreten(&mut alice, "lobby").await;
    beitreten(&mut langsam, "lobby").await;

    // Bob liest nicht; Socket-Puffer und Queue laufen voll
    for i in 0..120u32 {
        let antwort = anfrage(&mut alice, 10 + i, publish("lobby", envelope("alice", 200_000, i as u8))).await;
        assert!(matches!(antwort, ControlPayload::PublishResponse(_)), "{antwort:?}");
    }

    assert!(relay.state.metriken.subscribers_evicted_total.get() >= 1);
    assert_eq!(relay.state.broadcaster.mitglieder(&RoomId::new("lobby")).len(), 1);

    // Bob erhaelt die eingereihten Broadcasts, dann einen Fehler, dann EOF
    let mut letzter_fehler = None;
    loop {
        match tokio::time::timeout(WARTEZEIT, langsam.next()).await {
            Ok(Some(Ok(nachricht))) => {
                if let ControlPayload::Error(e) = nachricht.payload {
                    letzter_fehler = Some(e.code);
                }
            }
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => panic!("Verdraengte Verbindung wurde nicht geschlossen"),
        }
    }
    assert_eq!(letzter_fehler, Some(ErrorCode::InternalError));
}

#[tokio::test]
async fn server_voll_lehnt_weitere_verbindungen_ab() {
    let config = RelayConfig {
        max_clients: 1,
        ..RelayConfig::default()
    };
    let relay = TestRelay::starten(config);
    let _alice = hallo(relay.addr, "alice").await;

    let mut zweiter = verbinden(relay.addr).await;
    let antwort = lesen(&mut zweiter).await;
    assert_eq!(fehler_code(&antwort.payload), ErrorCode::ServerFull);
}

#[tokio::test]
async fn shutdown_sendet_abschied() {
    let relay = TestRelay::starten(RelayConfig::default());
    let mut alice = hallo(relay.addr, "alice").await;

    relay.shutdown.send(true).unwrap();
    let abschied = lesen(&mut alice).await;
    assert_eq!(fehler_code(&abschied.payload), ErrorCode::InternalError);
}
