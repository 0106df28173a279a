//! Real-time-safe patch-graph audio engine with message-passing semantics.
//!
//! A [`Engine`] hosts *patches*: directed graphs of signal and control
//! objects advanced in fixed-size sample blocks. Control messages travel a
//! named publish/subscribe bus; bounded queues bridge the control and audio
//! domains so neither ever blocks on the other.
//!
//! ```
//! use parche_core::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new();
//! engine.init(EngineConfig::default())?;
//! let patch = engine.load_str(
//!     "object 1 osc~ 440\n\
//!      object 2 *~ 0.2\n\
//!      object 3 dac~\n\
//!      connect 1 0 2 0\n\
//!      connect 2 0 3 0\n\
//!      connect 2 0 3 1",
//! )?;
//! engine.dsp(true)?;
//!
//! let config = engine.config()?;
//! let mut block = vec![0.0; config.block_size * config.output_channels];
//! engine.process_block(&[], &mut block)?;
//!
//! engine.close(patch)?;
//! engine.release()?;
//! # Ok::<(), parche_core::EngineError>(())
//! ```
//!
//! The audio side of an engine is driven through an [`AudioProcessor`]
//! handle, which is `Send + Clone` and owns nothing but the block step;
//! everything a backend callback needs.

mod bus;
mod config;
mod engine;
mod error;
mod graph;
mod message;
mod queue;

pub use config::EngineConfig;
pub use engine::{AudioProcessor, Engine, EngineState, SubscriptionId};
pub use error::{ConfigError, EngineError, Result};
pub use graph::PatchId;
pub use message::{Atom, Message, MessageSink, MidiEvent};
