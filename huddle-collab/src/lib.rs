//! # huddle-collab — Room synchronization and signaling engine
//!
//! Coordinates clients editing shared artifacts (a plain-text code buffer,
//! a rich-text document, a voice conversation) inside a named room.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per conn)  │     Binary Proto    │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ RelayEvent  │                     │ RoomRegistry│
//! │ stream      │                     │             │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │  Room actor   │
//!                                    │ (per room)    │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded RelayMessage)
//! - [`registry`] — Process-wide room registry with lazy room lifecycle
//! - [`room`] — Per-room actor: membership, code channel, document, voice
//! - [`document`] — Operation log, materialized snapshot, persistence sink
//! - [`voice`] — Voice-participant roster
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket relay client
//!
//! ## Delivery model
//!
//! Frames for one room are relayed to each member in arrival order (FIFO
//! per room, nothing global); a sender never receives its own event back.
//! Code broadcast is last-writer-wins by design, and document operations
//! merge in arrival order with no transformation.

pub mod client;
pub mod document;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;
pub mod voice;

// Re-exports for convenience
pub use client::{ConnectionState, RelayEvent, SyncClient};
pub use document::{DocOp, Document, FormatSpan, MemorySink, NullSink, Snapshot, SnapshotSink};
pub use protocol::{MemberInfo, MessageKind, ProtocolError, RelayMessage};
pub use registry::{RegistryError, RoomRegistry};
pub use room::{Outbox, OutboundFrame, Room, RoomEvent};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use voice::VoiceRoster;
