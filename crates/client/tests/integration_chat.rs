//! Integration-Tests: ChatClients gegen ein echtes Relay
//!
//! Das Relay laeuft in einem eigenen Thread mit eigener Runtime und
//! In-Memory-SQLite; die Clients verbinden sich ueber TCP.

use coletiva_client::{ChatClient, ClientConfig, ClientError};
use coletiva_core::{ParticipantId, RoomId};
use coletiva_crypto::{CryptoError, FileKeyStorage, KeyPairStorage, MemoryKeyStorage};
use coletiva_db::SqliteDb;
use coletiva_observability::RelayMetrics;
use coletiva_relay::{RelayConfig, RelayServer, RelayState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

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
    fn starten() -> Self {
        let (bereit_tx, bereit_rx) = std::sync::mpsc::channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let db = Arc::new(SqliteDb::in_memory().await.unwrap());
                let state =
                    RelayState::neu(RelayConfig::default(), db, RelayMetrics::neu().unwrap());
                let server =
                    RelayServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
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

async fn client(relay: &TestRelay, name: &str) -> ChatClient<MemoryKeyStorage> {
    client_mit_storage(relay, name, MemoryKeyStorage::new()).await
}

async fn client_mit_storage<S: KeyPairStorage>(
    relay: &TestRelay,
    name: &str,
    storage: S,
) -> ChatClient<S> {
    let client = ChatClient::new(
        ParticipantId::new(name),
        storage,
        relay.addr,
        ClientConfig::default(),
    )
    .await
    .unwrap();
    client.start().await.unwrap();
    client
}

async fn naechste<S: KeyPairStorage>(client: &ChatClient<S>) -> coletiva_client::EmpfangeneNachricht {
    tokio::time::timeout(WARTEZEIT, client.next_message())
        .await
        .expect("Timeout beim Warten auf Nachricht")
        .expect("Verbindung getrennt")
}

fn ids(namen: &[&str]) -> Vec<ParticipantId> {
    namen.iter().map(|n| ParticipantId::new(*n)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zwei_teilnehmer_tauschen_nachrichten_aus() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("familie");

    let alice = client(&relay, "alice").await;
    let bob = client(&relay, "bob").await;
    alice.join(&raum).await.unwrap();
    bob.join(&raum).await.unwrap();

    // Alice kennt Bob erst nach gezieltem Nachladen
    let gesendet = alice
        .send_message(&raum, "Oi Bob!", &ids(&["bob"]))
        .await
        .unwrap();
    assert_eq!(gesendet.keys.len(), 2, "Absenderin ist immer Empfaengerin");

    let empfangen = naechste(&bob).await;
    assert_eq!(empfangen.envelope_id, gesendet.id);
    assert_eq!(empfangen.sender_id, ParticipantId::new("alice"));
    assert_eq!(empfangen.room_id, raum);
    assert_eq!(empfangen.inhalt.unwrap(), "Oi Bob!");

    bob.send_message(&raum, "Oi Alice!", &ids(&["alice"]))
        .await
        .unwrap();
    let antwort = naechste(&alice).await;
    assert_eq!(antwort.inhalt.unwrap(), "Oi Alice!");
}

#[tokio::test]
async fn eigene_nachrichten_sind_in_der_history_lesbar() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("notizen");

    let alice = client(&relay, "alice").await;
    let bob = client(&relay, "bob").await;
    alice.join(&raum).await.unwrap();
    bob.join(&raum).await.unwrap();

    alice
        .send_message(&raum, "erste", &ids(&["bob"]))
        .await
        .unwrap();
    alice
        .send_message(&raum, "zweite", &ids(&["bob"]))
        .await
        .unwrap();

    let history = alice.history(&raum, None, None).await.unwrap().nachrichten;
    let texte: Vec<String> = history
        .into_iter()
        .map(|n| n.inhalt.unwrap())
        .collect();
    assert_eq!(texte, vec!["erste", "zweite"]);
}

#[tokio::test]
async fn gruppe_mit_drei_teilnehmern() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("gruppe");

    let alice = client(&relay, "alice").await;
    let bob = client(&relay, "bob").await;
    let carol = client(&relay, "carol").await;
    for c in [&alice, &bob, &carol] {
        c.join(&raum).await.unwrap();
    }

    let envelope = alice
        .send_message(&raum, "Bom dia a todos", &ids(&["bob", "carol"]))
        .await
        .unwrap();
    assert_eq!(envelope.keys.len(), 3);

    for empfaenger in [&bob, &carol] {
        let nachricht = naechste(empfaenger).await;
        assert_eq!(nachricht.envelope_id, envelope.id);
        assert_eq!(nachricht.inhalt.unwrap(), "Bom dia a todos");
    }
}

#[tokio::test]
async fn nicht_empfaenger_kann_nicht_mitlesen() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("geheim");

    let alice = client(&relay, "alice").await;
    let bob = client(&relay, "bob").await;
    let eve = client(&relay, "eve").await;
    for c in [&alice, &bob, &eve] {
        c.join(&raum).await.unwrap();
    }

    alice
        .send_message(&raum, "nur fuer Bob", &ids(&["bob"]))
        .await
        .unwrap();

    assert_eq!(naechste(&bob).await.inhalt.unwrap(), "nur fuer Bob");

    // Eve ist im Raum und bekommt den Envelope, kann ihn aber nicht lesen
    let abgefangen = naechste(&eve).await;
    assert!(!abgefangen.ist_lesbar());
    assert!(matches!(
        abgefangen.inhalt,
        Err(CryptoError::NoKeyForRecipient)
    ));

    // Das Relay speichert nur Chiffretext
    let gespeichert = relay
        .state
        .envelopes
        .history_laden(coletiva_chat::HistoryAnfrage::neueste(raum.clone()))
        .await
        .unwrap()
        .envelopes;
    assert_eq!(gespeichert.len(), 1);
    let chiffretext = &gespeichert[0].ciphertext;
    assert!(!chiffretext
        .windows(b"nur fuer Bob".len())
        .any(|w| w == b"nur fuer Bob"));
}

#[tokio::test]
async fn fehlender_empfaengerschluessel_verhindert_senden() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("raum");

    let alice = client(&relay, "alice").await;
    alice.join(&raum).await.unwrap();

    let ergebnis = alice
        .send_message(&raum, "hallo?", &ids(&["niemand"]))
        .await;
    match ergebnis {
        Err(ClientError::Krypto(CryptoError::RecipientKeyMissing { recipient })) => {
            assert_eq!(recipient, ParticipantId::new("niemand"));
        }
        andere => panic!("Unerwartetes Ergebnis: {andere:?}"),
    }

    // Nichts wurde veroeffentlicht
    let history = alice.history(&raum, None, None).await.unwrap().nachrichten;
    assert!(history.is_empty());
}

#[tokio::test]
async fn senden_ohne_beitritt_ist_zustandsfehler() {
    let relay = TestRelay::starten();
    let alice = client(&relay, "alice").await;

    let ergebnis = alice
        .send_message(&RoomId::new("fremd"), "hallo", &[])
        .await;
    assert!(
        matches!(ergebnis, Err(ClientError::ChannelDisconnected(_))),
        "{ergebnis:?}"
    );
}

#[tokio::test]
async fn neuer_teilnehmer_wird_beim_empfang_nachgeladen() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("spaet");

    let alice = client(&relay, "alice").await;
    alice.join(&raum).await.unwrap();

    // Bob registriert sich erst nach Alices Verzeichnis-Abgleich
    let bob = client(&relay, "bob").await;
    bob.join(&raum).await.unwrap();
    assert!(alice.key_store().lookup(&ParticipantId::new("bob")).is_none());

    bob.send_message(&raum, "ich bin neu", &ids(&["alice"]))
        .await
        .unwrap();

    let nachricht = naechste(&alice).await;
    assert_eq!(nachricht.inhalt.unwrap(), "ich bin neu");
    assert!(alice.key_store().lookup(&ParticipantId::new("bob")).is_some());
}

#[tokio::test]
async fn identitaet_ueberlebt_neustart_mit_dateispeicher() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("archiv");
    let verzeichnis = tempfile::tempdir().unwrap();

    let bob = client(&relay, "bob").await;
    bob.join(&raum).await.unwrap();

    let envelope_id = {
        let alice = client_mit_storage(
            &relay,
            "alice",
            FileKeyStorage::new(verzeichnis.path()),
        )
        .await;
        alice.join(&raum).await.unwrap();
        alice
            .send_message(&raum, "vor dem Neustart", &ids(&["bob"]))
            .await
            .unwrap()
            .id
    };
    naechste(&bob).await;

    // Gleiches Schluesselpaar aus der Datei: alte Nachrichten bleiben lesbar
    let alice = client_mit_storage(
        &relay,
        "alice",
        FileKeyStorage::new(verzeichnis.path()),
    )
    .await;
    alice.join(&raum).await.unwrap();

    let history = alice.history(&raum, None, None).await.unwrap().nachrichten;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].envelope_id, envelope_id);
    assert_eq!(history[0].inhalt.as_deref().unwrap(), "vor dem Neustart");
}

#[tokio::test]
async fn verlassener_raum_liefert_keine_nachrichten_mehr() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("kurz");

    let alice = client(&relay, "alice").await;
    let bob = client(&relay, "bob").await;
    alice.join(&raum).await.unwrap();
    bob.join(&raum).await.unwrap();

    assert!(bob.leave(&raum).await.unwrap());
    assert!(!bob.leave(&raum).await.unwrap(), "zweites Verlassen ist No-Op");

    alice
        .send_message(&raum, "hoert mich jemand?", &ids(&["bob"]))
        .await
        .unwrap();

    let nichts = tokio::time::timeout(Duration::from_millis(300), bob.next_message()).await;
    assert!(nichts.is_err(), "Bob darf nichts mehr empfangen");
}

#[tokio::test]
async fn history_blaettert_mit_cursor() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("archiv");

    let alice = client(&relay, "alice").await;
    alice.join(&raum).await.unwrap();
    for text in ["eins", "zwei", "drei"] {
        alice.send_message(&raum, text, &[]).await.unwrap();
    }

    let neueste = alice.history(&raum, None, Some(2)).await.unwrap();
    let texte: Vec<String> = neueste
        .nachrichten
        .into_iter()
        .map(|n| n.inhalt.unwrap())
        .collect();
    assert_eq!(texte, vec!["zwei", "drei"]);

    let aeltere = alice
        .history(&raum, neueste.weitere_vor, Some(2))
        .await
        .unwrap();
    assert_eq!(aeltere.nachrichten.len(), 1);
    assert_eq!(aeltere.nachrichten[0].inhalt.as_deref().unwrap(), "eins");
    assert_eq!(aeltere.weitere_vor, None);
}

#[tokio::test]
async fn volle_broadcast_queue_trennt_statt_anfragen_zu_blockieren() {
    let relay = TestRelay::starten();
    let raum = RoomId::new("flut");

    let alice = client(&relay, "alice").await;
    let bob = ChatClient::new(
        ParticipantId::new("bob"),
        MemoryKeyStorage::new(),
        relay.addr,
        ClientConfig {
            broadcast_queue: 2,
            anfrage_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        },
    )
    .await
    .unwrap();
    bob.start().await.unwrap();
    alice.join(&raum).await.unwrap();
    bob.join(&raum).await.unwrap();

    // Bob liest nichts ab
    for i in 0..5 {
        alice
            .send_message(&raum, &format!("nachricht {i}"), &ids(&["bob"]))
            .await
            .unwrap();
    }

    tokio::time::timeout(WARTEZEIT, async {
        while bob.verbindung().ist_verbunden() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Bob wurde nicht getrennt");

    // Anfragen scheitern sofort statt in den Timeout zu laufen
    let start = std::time::Instant::now();
    let ergebnis = bob.history(&raum, None, None).await;
    assert!(
        matches!(ergebnis, Err(ClientError::ChannelDisconnected(_))),
        "{ergebnis:?}"
    );
    assert!(start.elapsed() < Duration::from_secs(1));

    // Eingereihte Broadcasts bleiben lesbar, danach ist Schluss
    assert_eq!(naechste(&bob).await.inhalt.unwrap(), "nachricht 0");
    assert_eq!(naechste(&bob).await.inhalt.unwrap(), "nachricht 1");
    let ende = tokio::time::timeout(WARTEZEIT, bob.next_message()).await;
    assert!(matches!(ende, Ok(None)));
}
