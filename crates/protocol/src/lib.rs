//! coletiva-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alles was zwischen Client und Relay ausgetauscht
//! wird:
//! - `envelope` – der verschluesselte Envelope (undurchsichtig fuer das Relay)
//! - `control` – Control-Nachrichten (Handshake, Raeume, Publish, Register)
//! - `wire` – Length-prefixed JSON Frame-Codec
//! - `session` – Zustandsautomat einer Realtime-Verbindung

pub mod control;
pub mod envelope;
pub mod session;
pub mod wire;

pub use control::{ControlMessage, ControlPayload, ErrorCode};
pub use envelope::{Envelope, EnvelopeMeta, PayloadAlgorithm, WrappedKey, NONCE_LAENGE};
pub use session::{ChannelState, ZustandsFehler};
pub use wire::{ControlCodec, FrameCodec};
