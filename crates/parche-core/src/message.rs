//! Control-domain value types: atoms, messages, MIDI events.
//!
//! Messages are immutable once constructed; sending transfers ownership
//! into the engine, so nothing here is reference-counted or interior-mutable.

use std::fmt;

/// A single element of a list or typed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// Numeric atom.
    Float(f32),
    /// Symbolic atom.
    Symbol(String),
}

impl Atom {
    /// Returns the numeric value, or `None` for a symbol.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Symbol(_) => None,
        }
    }

    /// Returns the symbol text, or `None` for a float.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Float(_) => None,
            Self::Symbol(s) => Some(s),
        }
    }
}

impl From<f32> for Atom {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Self::Symbol(s.to_owned())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Symbol(s) => write!(f, "{s}"),
        }
    }
}

/// A discrete control message traveling the bus or a control connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Trigger with no payload.
    Bang,
    /// Single float.
    Float(f32),
    /// Single symbol.
    Symbol(String),
    /// Ordered list of atoms.
    List(Vec<Atom>),
    /// Selector plus arguments, e.g. `pitch 60 0.5`.
    Typed {
        /// Message selector.
        selector: String,
        /// Selector arguments.
        args: Vec<Atom>,
    },
}

impl Message {
    /// Interprets the message as a single float where that makes sense.
    ///
    /// A bang carries no value; a one-element float list coerces.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::List(atoms) if atoms.len() == 1 => atoms[0].as_float(),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bang => write!(f, "bang"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Symbol(s) => write!(f, "{s}"),
            Self::List(atoms) => {
                for (i, atom) in atoms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{atom}")?;
                }
                Ok(())
            }
            Self::Typed { selector, args } => {
                write!(f, "{selector}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// A MIDI event crossing the engine boundary in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Note on (a zero velocity is a note off by convention).
    NoteOn {
        /// Channel 0-15.
        channel: u8,
        /// Pitch 0-127.
        pitch: u8,
        /// Velocity 0-127.
        velocity: u8,
    },
    /// Continuous controller change.
    ControlChange {
        /// Channel 0-15.
        channel: u8,
        /// Controller number 0-127.
        controller: u8,
        /// Controller value 0-127.
        value: u8,
    },
    /// Program change.
    ProgramChange {
        /// Channel 0-15.
        channel: u8,
        /// Program number 0-127.
        program: u8,
    },
    /// Pitch bend, centered at zero.
    PitchBend {
        /// Channel 0-15.
        channel: u8,
        /// Bend amount, -8192..=8191.
        value: i16,
    },
    /// Channel aftertouch.
    Aftertouch {
        /// Channel 0-15.
        channel: u8,
        /// Pressure 0-127.
        value: u8,
    },
    /// Polyphonic aftertouch.
    PolyAftertouch {
        /// Channel 0-15.
        channel: u8,
        /// Pitch 0-127.
        pitch: u8,
        /// Pressure 0-127.
        value: u8,
    },
    /// Raw byte for pass-through of anything not modeled above.
    Raw(u8),
}

/// Consumer-side receiver for everything the engine emits outward.
///
/// Implementations are invoked from [`Engine::dispatch_pending`], always on
/// the calling thread, never from the audio context. All methods default to
/// no-ops so a sink implements only what it cares about.
///
/// [`Engine::dispatch_pending`]: crate::Engine::dispatch_pending
#[allow(unused_variables)]
pub trait MessageSink {
    /// A bang arrived on a subscribed channel.
    fn bang(&mut self, source: &str) {}

    /// A float arrived on a subscribed channel.
    fn float(&mut self, source: &str, value: f32) {}

    /// A symbol arrived on a subscribed channel.
    fn symbol(&mut self, source: &str, value: &str) {}

    /// A list arrived on a subscribed channel.
    fn list(&mut self, source: &str, atoms: &[Atom]) {}

    /// A typed message arrived on a subscribed channel.
    fn typed(&mut self, source: &str, selector: &str, args: &[Atom]) {}

    /// A `print` object emitted a line.
    fn print(&mut self, line: &str) {}

    /// A MIDI event left the engine (e.g. from `noteout`).
    fn midi(&mut self, event: MidiEvent) {}

    /// A block evaluation fault was caught and the block zero-filled.
    fn fault(&mut self, block: u64, reason: &str) {}
}

impl Message {
    /// Routes `self` to the matching sink callback.
    pub fn dispatch(&self, source: &str, sink: &mut dyn MessageSink) {
        match self {
            Self::Bang => sink.bang(source),
            Self::Float(v) => sink.float(source, *v),
            Self::Symbol(s) => sink.symbol(source, s),
            Self::List(atoms) => sink.list(source, atoms),
            Self::Typed { selector, args } => sink.typed(source, selector, args),
        }
    }
}
