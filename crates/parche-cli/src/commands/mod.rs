//! CLI subcommands.

pub mod check;
pub mod devices;
pub mod play;
pub mod render;

use parche_core::{MessageSink, MidiEvent};

/// Sink that forwards engine output to the terminal.
#[derive(Default)]
pub struct ConsoleSink;

impl MessageSink for ConsoleSink {
    fn print(&mut self, line: &str) {
        println!("{line}");
    }

    fn midi(&mut self, event: MidiEvent) {
        println!("midi: {event:?}");
    }

    fn fault(&mut self, block: u64, reason: &str) {
        eprintln!("fault in block {block}: {reason}");
    }
}
