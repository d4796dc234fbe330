//! coletiva-relay – Realtime-Relay fuer verschluesselte Envelopes
//!
//! Das Relay nimmt TCP-Verbindungen an, fuehrt pro Verbindung den
//! Zustandsautomaten aus `coletiva_protocol::session`, speichert
//! veroeffentlichte Envelopes und verteilt sie an alle anderen Mitglieder
//! eines Raums. Envelope-Inhalte sieht es nie.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (RelayServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein lokaler Task)
//!     |  ChannelState: Connecting -> Authenticated -> Joined(raeume)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- session_handler  (Hello, Logout, Ping)
//!     +-- room_handler     (Join, Leave)
//!     +-- envelope_handler (Publish, History)
//!     +-- key_handler      (KeyRegister, KeyList)
//!
//! RoomBroadcaster – Send-Queues und Raum-Mitgliedschaften
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod server_state;
pub mod tcp;

pub use broadcast::{FanOutBericht, RoomBroadcaster, VerbindungsId};
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{RelayError, RelayResult};
pub use server_state::{RelayConfig, RelayState};
pub use tcp::RelayServer;
