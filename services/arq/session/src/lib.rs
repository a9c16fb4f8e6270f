//! Stop-and-wait ARQ sessions over unreliable byte streams.
//!
//! This crate runs the alternating-bit protocol from `arq-wire` on top of a
//! tokio byte stream. Each [`Session`] owns one transport and a single task
//! that retransmits the in-flight frame until the peer acknowledges it,
//! announces its own receive bit on a fixed heartbeat, and hands every
//! accepted payload to the application exactly once.
//!
//! ## Features
//!
//! - **Sender**: one frame in flight, retried on a fixed interval
//! - **Heartbeat**: periodic ACK of the receive bit
//! - **Writer Task**: queued transport writes that never block reading
//! - **Session Management**: select loop with event channel and statistics
//! - **Transports**: TCP, in-process pipes, and a bit-flipping test wrapper
//!
//! ## Example
//!
//! ```rust,no_run
//! use arq_session::{connect_tcp, IoStream, Session, SessionConfig, SessionEvent};
//! use serde_json::{json, Value};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let stream = connect_tcp("127.0.0.1:9600".parse()?).await?;
//! let (session, mut events) =
//!     Session::<Value>::spawn(IoStream::Plain(stream), SessionConfig::default());
//!
//! session.send(&json!({"hello": "world"}))?.delivered().await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Message(value) => println!("Received {}", value),
//!         SessionEvent::Error(e) => eprintln!("Discarded frame: {}", e),
//!         SessionEvent::Disconnected { .. } => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod heartbeat;
pub mod sender;
pub mod session;
pub mod transport;
pub mod writer;

// Re-export main types
pub use error::SessionError;
pub use heartbeat::Heartbeat;
pub use sender::{Delivery, RetryAction, Sender};
pub use session::{LinkBits, Session, SessionConfig, SessionEvent, SessionStats};
pub use transport::{connect_tcp, listen_tcp, IoStream, Noise, NoisyStream};
pub use writer::{spawn_writer, FrameWriter, Queued, WriterTask, DEFAULT_WRITE_QUEUE_DEPTH};
