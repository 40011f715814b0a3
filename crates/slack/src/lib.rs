//! Slack Socket Mode bot
//!
//! This crate turns a Slack Socket Mode connection into a command bot:
//! - **Session** (`session`, `socket`, `transport`) - Socket Mode connection with reconnects
//! - **Bridge** (`bridge`) - Callback events turned into a channel, plus connectivity state
//! - **Commands** (`commands`, `text`) - Tokenizing and verb routing
//! - **Web API** (`web`, `blocks`) - `auth.test`, `chat.postMessage` and message options
//!
//! # Architecture
//!
//! ```text
//! Socket Mode → SocketModeSession → ConnectionBridge → Bot → Commands
//!                                                        ↓
//!                                  chat.postMessage ← Output
//! ```
//!
//! # Key Types
//!
//! - `Bot` / `BotBuilder` - Event loop and command registration
//! - `ConnectionBridge` - Pull-style view over a push-style session
//! - `SocketModeSession` - Reconnecting session over a `SocketTransport`
//! - `Commands` - Verb routing table; nests as a `Handler`

pub mod blocks;
pub mod bot;
pub mod bridge;
pub mod commands;
pub mod events;
pub mod session;
pub mod socket;
pub mod text;
pub mod transport;
pub mod web;

pub use bot::{Bot, BotBuilder, BotError};
pub use bridge::{BridgeError, BridgeRun, ConnectionBridge, ConnectionState, ConnectionWatch};
pub use commands::{handler_fn, Commands, Handler, HandlerFn};
pub use web::WebClient;
