//! Lokaler Speicher fuer das Identitaets-Schluesselpaar
//!
//! Das `KeyPairStorage`-Trait abstrahiert den konkreten Speicher (Datei,
//! In-Memory, Plattform-Keychain). Schreiben ist immer "create new": ein
//! einmal gespeichertes Paar wird nie ueberschrieben.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::AsyncWriteExt;

use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeyPair, PublicKey, SCHLUESSEL_LAENGE};

const PRIVATE_KEY_DATEI: &str = "private_key";
const PUBLIC_KEY_DATEI: &str = "public_key";

/// Abstrakter Schluessel-Speicher
#[allow(async_fn_in_trait)]
pub trait KeyPairStorage {
    /// Gespeichertes Paar laden (`None` wenn noch keins existiert)
    async fn laden(&self) -> CryptoResult<Option<KeyPair>>;

    /// Paar speichern, falls noch keins existiert
    ///
    /// Gibt `false` zurueck wenn bereits ein Paar gespeichert war; das
    /// vorhandene bleibt dann unveraendert.
    async fn speichern_neu(&self, key_pair: &KeyPair) -> CryptoResult<bool>;

    /// Gespeichertes Paar loeschen (expliziter Reset)
    async fn loeschen(&self) -> CryptoResult<()>;
}

/// Datei-basierter Speicher
///
/// Legt `private_key` und `public_key` (Base64) im Verzeichnis ab. Der
/// private Schluessel ist die Quelle der Wahrheit; unter Unix bekommt er
/// Modus 0600.
#[derive(Debug, Clone)]
pub struct FileKeyStorage {
    verzeichnis: PathBuf,
}

impl FileKeyStorage {
    pub fn new(verzeichnis: impl Into<PathBuf>) -> Self {
        Self {
            verzeichnis: verzeichnis.into(),
        }
    }

    pub fn verzeichnis(&self) -> &Path {
        &self.verzeichnis
    }

    fn pfad(&self, datei: &str) -> PathBuf {
        self.verzeichnis.join(datei)
    }

    async fn neue_datei_schreiben(pfad: &Path, inhalt: &[u8]) -> std::io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut datei = options.open(pfad).await?;
        datei.write_all(inhalt).await?;
        datei.sync_all().await
    }
}

fn private_key_dekodieren(inhalt: &str) -> CryptoResult<KeyPair> {
    let bytes = STANDARD.decode(inhalt.trim().as_bytes())?;
    let arr: [u8; SCHLUESSEL_LAENGE] =
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: bytes.len(),
            })?;
    Ok(KeyPair::aus_private_bytes(arr))
}

impl KeyPairStorage for FileKeyStorage {
    async fn laden(&self) -> CryptoResult<Option<KeyPair>> {
        let inhalt = match tokio::fs::read_to_string(self.pfad(PRIVATE_KEY_DATEI)).await {
            Ok(inhalt) => inhalt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let key_pair = private_key_dekodieren(&inhalt)?;

        // Public-Key-Datei ist abgeleitet; wenn vorhanden muss sie passen
        match tokio::fs::read_to_string(self.pfad(PUBLIC_KEY_DATEI)).await {
            Ok(pk) => {
                if PublicKey::aus_base64(&pk)? != key_pair.public_key() {
                    return Err(CryptoError::KeyPairUnavailable(
                        "public_key passt nicht zu private_key".into(),
                    ));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(pfad = %self.verzeichnis.display(), "Schluesselpaar geladen");
        Ok(Some(key_pair))
    }

    async fn speichern_neu(&self, key_pair: &KeyPair) -> CryptoResult<bool> {
        tokio::fs::create_dir_all(&self.verzeichnis).await?;

        // Erst vollstaendig in eine temporaere Datei schreiben, dann per
        // Hard-Link atomar unter dem finalen Namen anlegen.
        let tmp = self.pfad(&format!(
            "{PRIVATE_KEY_DATEI}.{:016x}.tmp",
            OsRng.next_u64()
        ));
        let inhalt = STANDARD.encode(key_pair.private_bytes().as_bytes());
        Self::neue_datei_schreiben(&tmp, inhalt.as_bytes()).await?;

        let verlinkt = tokio::fs::hard_link(&tmp, self.pfad(PRIVATE_KEY_DATEI)).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match verlinkt {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(
                    pfad = %self.verzeichnis.display(),
                    "Schluesselpaar existiert bereits, wird nicht ueberschrieben"
                );
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        tokio::fs::write(
            self.pfad(PUBLIC_KEY_DATEI),
            key_pair.public_key().zu_base64(),
        )
        .await?;

        tracing::info!(pfad = %self.verzeichnis.display(), "Neues Schluesselpaar gespeichert");
        Ok(true)
    }

    async fn loeschen(&self) -> CryptoResult<()> {
        for datei in [PRIVATE_KEY_DATEI, PUBLIC_KEY_DATEI] {
            match tokio::fs::remove_file(self.pfad(datei)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(pfad = %self.verzeichnis.display(), "Schluesselpaar geloescht");
        Ok(())
    }
}

/// Fluechtiger Speicher (Tests, kurzlebige Clients)
#[derive(Debug, Default)]
pub struct MemoryKeyStorage {
    paar: Mutex<Option<KeyPair>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Speicher mit bereits vorhandenem Paar
    pub fn mit_paar(key_pair: KeyPair) -> Self {
        Self {
            paar: Mutex::new(Some(key_pair)),
        }
    }
}

impl KeyPairStorage for MemoryKeyStorage {
    async fn laden(&self) -> CryptoResult<Option<KeyPair>> {
        Ok(self.paar.lock().clone())
    }

    async fn speichern_neu(&self, key_pair: &KeyPair) -> CryptoResult<bool> {
        let mut paar = self.paar.lock();
        if paar.is_some() {
            return Ok(false);
        }
        *paar = Some(key_pair.clone());
        Ok(true)
    }

    async fn loeschen(&self) -> CryptoResult<()> {
        *self.paar.lock() = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn datei_speicher_schreibt_genau_einmal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileKeyStorage::new(dir.path().join("keys"));

        assert!(storage.laden().await.unwrap().is_none());

        let erstes = KeyPair::generieren();
        assert!(storage.speichern_neu(&erstes).await.unwrap());

        let zweites = KeyPair::generieren();
        assert!(!storage.speichern_neu(&zweites).await.unwrap());

        let geladen = storage.laden().await.unwrap().unwrap();
        assert_eq!(geladen.public_key(), erstes.public_key());

        // Keine temporaeren Dateien liegen geblieben
        let mut eintraege = std::fs::read_dir(storage.verzeichnis())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        eintraege.sort();
        assert_eq!(eintraege, vec!["private_key", "public_key"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn private_key_nur_fuer_besitzer_lesbar() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileKeyStorage::new(dir.path());
        storage.speichern_neu(&KeyPair::generieren()).await.unwrap();

        let meta = std::fs::metadata(dir.path().join("private_key")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn unpassender_public_key_ist_fehler() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileKeyStorage::new(dir.path());
        storage.speichern_neu(&KeyPair::generieren()).await.unwrap();

        std::fs::write(
            dir.path().join("public_key"),
            KeyPair::generieren().public_key().zu_base64(),
        )
        .unwrap();
        assert!(matches!(
            storage.laden().await,
            Err(CryptoError::KeyPairUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn kaputte_datei_ist_fehler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("private_key"), "nicht base64 !!!").unwrap();
        let storage = FileKeyStorage::new(dir.path());
        assert!(storage.laden().await.is_err());
    }

    #[tokio::test]
    async fn loeschen_ist_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileKeyStorage::new(dir.path());
        storage.loeschen().await.unwrap();
        storage.speichern_neu(&KeyPair::generieren()).await.unwrap();
        storage.loeschen().await.unwrap();
        assert!(storage.laden().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_speicher_ueberschreibt_nicht() {
        let storage = MemoryKeyStorage::new();
        let a = KeyPair::generieren();
        assert!(storage.speichern_neu(&a).await.unwrap());
        assert!(!storage.speichern_neu(&KeyPair::generieren()).await.unwrap());
        assert_eq!(
            storage.laden().await.unwrap().unwrap().public_key(),
            a.public_key()
        );
    }
}
