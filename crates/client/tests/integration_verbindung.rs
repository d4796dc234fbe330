//! Integration-Tests fuer RelayConnection gegen Fake-Relays
//!
//! Ein minimaler TCP-Server spielt das Relay und steuert Antworten,
//! Schweigen und Verbindungsabbrueche.

use coletiva_client::{Backoff, ChatClient, ClientConfig, ClientError, RelayConnection};
use coletiva_core::{ParticipantId, RoomId};
use coletiva_crypto::MemoryKeyStorage;
use coletiva_protocol::control::{ControlPayload, HelloResponse, KeyListResponse, PingMessage};
use coletiva_protocol::{ControlCodec, ControlMessage, ErrorCode};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

fn config(timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        anfrage_timeout: Duration::from_millis(timeout_ms),
        ..ClientConfig::default()
    }
}

/// Startet ein Fake-Relay; `verhalten` bekommt die erste Verbindung
async fn fake_relay<F, Fut>(verhalten: F) -> SocketAddr
where
    F: FnOnce(Framed<TcpStream, ControlCodec>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        verhalten(Framed::new(stream, ControlCodec::new())).await;
    });
    addr
}

#[tokio::test]
async fn anfrage_ohne_antwort_laeuft_in_timeout() {
    let addr = fake_relay(|mut framed| async move {
        // Liest alles, antwortet nie
        while framed.next().await.is_some() {}
    })
    .await;

    let verbindung = RelayConnection::verbinden(addr, &config(200)).await.unwrap();
    let ergebnis = verbindung.hallo(&ParticipantId::new("alice")).await;

    match ergebnis {
        Err(e @ ClientError::Timeout { art: "hello" }) => assert!(e.ist_wiederholbar()),
        andere => panic!("Erwartet Timeout, erhalten: {andere:?}"),
    }
}

#[tokio::test]
async fn verbindungsabbruch_beendet_wartende_anfrage() {
    let addr = fake_relay(|mut framed| async move {
        // Erste Anfrage lesen und dann auflegen
        let _ = framed.next().await;
    })
    .await;

    let verbindung = RelayConnection::verbinden(addr, &config(5_000)).await.unwrap();
    let ergebnis = verbindung.hallo(&ParticipantId::new("alice")).await;

    assert!(
        matches!(ergebnis, Err(ClientError::ChannelDisconnected(_))),
        "{ergebnis:?}"
    );

    // Lese-Task hat den Zustand auf Disconnected gesetzt
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!verbindung.ist_verbunden());
    assert!(verbindung.naechster_broadcast().await.is_none());
}

#[tokio::test]
async fn anfrage_nach_trennung_scheitert_sofort() {
    let addr = fake_relay(|mut framed| async move {
        let _ = framed.next().await;
    })
    .await;

    let verbindung = RelayConnection::verbinden(addr, &config(5_000)).await.unwrap();
    let _ = verbindung.hallo(&ParticipantId::new("alice")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!verbindung.ist_verbunden());

    let start = Instant::now();
    let ergebnis = verbindung.schluessel_auflisten(None).await;
    assert!(
        matches!(ergebnis, Err(ClientError::ChannelDisconnected(_))),
        "{ergebnis:?}"
    );
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn relay_fehler_wird_zu_client_fehler() {
    let addr = fake_relay(|mut framed| async move {
        if let Some(Ok(anfrage)) = framed.next().await {
            let _ = framed
                .send(ControlMessage::error(
                    anfrage.request_id,
                    ErrorCode::ServerFull,
                    "voll",
                ))
                .await;
        }
        while framed.next().await.is_some() {}
    })
    .await;

    let verbindung = RelayConnection::verbinden(addr, &config(2_000)).await.unwrap();
    let fehler = verbindung
        .hallo(&ParticipantId::new("alice"))
        .await
        .unwrap_err();

    assert!(matches!(
        fehler,
        ClientError::Relay {
            code: ErrorCode::ServerFull,
            ..
        }
    ));
    assert!(fehler.ist_wiederholbar());
    assert!(!verbindung.zustand().ist_authentifiziert());
}

#[tokio::test]
async fn relay_ping_wird_automatisch_beantwortet() {
    let (pong_tx, pong_rx) = tokio::sync::oneshot::channel();
    let addr = fake_relay(|mut framed| async move {
        framed
            .send(ControlMessage::new(
                0,
                ControlPayload::Ping(PingMessage { timestamp_ms: 4242 }),
            ))
            .await
            .unwrap();
        while let Some(Ok(nachricht)) = framed.next().await {
            if let ControlPayload::Pong(pong) = nachricht.payload {
                let _ = pong_tx.send(pong.echo_timestamp_ms);
                break;
            }
        }
    })
    .await;

    let _verbindung = RelayConnection::verbinden(addr, &config(2_000)).await.unwrap();
    let echo = tokio::time::timeout(Duration::from_secs(5), pong_rx)
        .await
        .expect("Kein Pong erhalten")
        .unwrap();
    assert_eq!(echo, 4242);
}

#[tokio::test]
async fn hallo_und_beitritt_aktualisieren_lokalen_zustand() {
    let addr = fake_relay(|mut framed| async move {
        while let Some(Ok(anfrage)) = framed.next().await {
            let antwort = match anfrage.payload {
                ControlPayload::Hello(hello) => ControlPayload::HelloResponse(HelloResponse {
                    participant_id: hello.participant_id,
                    session_id: 7,
                    server_name: "Fake".into(),
                }),
                ControlPayload::RoomJoin(join) => ControlPayload::RoomJoinResponse(
                    coletiva_protocol::control::RoomJoinResponse {
                        room_id: join.room_id,
                        mitglieder: 1,
                    },
                ),
                _ => break,
            };
            framed
                .send(ControlMessage::new(anfrage.request_id, antwort))
                .await
                .unwrap();
        }
    })
    .await;

    let verbindung = RelayConnection::verbinden(addr, &config(2_000)).await.unwrap();
    let raum = RoomId::new("lobby");

    // Vor Hello ist kein Beitritt moeglich
    assert!(matches!(
        verbindung.beitreten(&raum).await,
        Err(ClientError::ChannelDisconnected(_))
    ));

    let hello = verbindung.hallo(&ParticipantId::new("alice")).await.unwrap();
    assert_eq!(hello.server_name, "Fake");
    assert_eq!(verbindung.beitreten(&raum).await.unwrap(), 1);
    assert!(verbindung.zustand().ist_beigetreten(&raum));

    // Verlassen eines fremden Raums ist lokal ein No-Op
    assert!(!verbindung.verlassen(&RoomId::new("anderswo")).await.unwrap());
}

#[tokio::test]
async fn verbinden_mit_backoff_gibt_nach_max_versuchen_auf() {
    // Freien Port belegen und wieder freigeben: dort lauscht niemand
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(20));
    let ergebnis = RelayConnection::verbinden_mit_backoff(addr, &config(500), &mut backoff, 3).await;

    assert!(matches!(ergebnis, Err(ClientError::Io(_))));
    assert_eq!(backoff.versuche(), 2, "zwei Wartezeiten vor dem dritten Versuch");
}

#[tokio::test]
async fn verbinden_mit_backoff_setzt_zaehler_zurueck() {
    let addr = fake_relay(|mut framed| async move {
        while framed.next().await.is_some() {}
    })
    .await;

    let mut backoff = Backoff::default();
    backoff.naechste_verzoegerung();
    let verbindung = RelayConnection::verbinden_mit_backoff(addr, &config(2_000), &mut backoff, 5)
        .await
        .unwrap();

    assert!(verbindung.ist_verbunden());
    assert_eq!(backoff.versuche(), 0);
}

#[tokio::test]
async fn start_ueberlebt_fehlgeschlagene_schluessel_registrierung() {
    let addr = fake_relay(|mut framed| async move {
        let mut registrierungen = 0;
        while let Some(Ok(anfrage)) = framed.next().await {
            let antwort = match anfrage.payload {
                ControlPayload::Hello(hello) => ControlPayload::HelloResponse(HelloResponse {
                    participant_id: hello.participant_id,
                    session_id: 1,
                    server_name: "Fake".into(),
                }),
                // Erste Registrierung schlaegt fehl, danach klappt es
                ControlPayload::KeyRegister(req) => {
                    registrierungen += 1;
                    if registrierungen == 1 {
                        framed
                            .send(ControlMessage::error(
                                anfrage.request_id,
                                ErrorCode::InternalError,
                                "Register nicht verfuegbar",
                            ))
                            .await
                            .unwrap();
                        continue;
                    }
                    ControlPayload::KeyRegisterResponse {
                        participant_id: req.participant_id,
                    }
                }
                ControlPayload::KeyList(_) => {
                    ControlPayload::KeyListResponse(KeyListResponse { entries: Vec::new() })
                }
                _ => break,
            };
            framed
                .send(ControlMessage::new(anfrage.request_id, antwort))
                .await
                .unwrap();
        }
    })
    .await;

    let client = ChatClient::new(
        ParticipantId::new("alice"),
        MemoryKeyStorage::new(),
        addr,
        config(2_000),
    )
    .await
    .unwrap();

    let bericht = client.start().await.unwrap();
    assert!(!bericht.is_partial());
    assert!(client.publish_ausstehend());

    assert!(client.publish_nachholen().await.unwrap());
    assert!(!client.publish_ausstehend());
    assert!(!client.publish_nachholen().await.unwrap());
}
