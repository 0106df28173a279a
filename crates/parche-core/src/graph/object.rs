//! Object kinds, port domains, and per-object DSP state.
//!
//! Every object has a fixed set of inlets and outlets, each either signal
//! or control domain, determined at creation and never changed. Signal
//! state (oscillator phase, delay memory, threshold hysteresis) lives
//! inside the kind so a node is self-contained.

use std::f64::consts::TAU;

use crate::config::EngineConfig;
use crate::message::Message;

/// Domain of a single inlet or outlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortDomain {
    Signal,
    Control,
}

/// Object kind plus its runtime state.
#[derive(Debug, Clone)]
pub(crate) enum ObjectKind {
    /// Sine oscillator. Control inlet sets frequency in Hz.
    Osc { freq: f32, phase: f64 },
    /// Sawtooth ramp from 0 to 1. Control inlet sets frequency in Hz.
    Phasor { freq: f32, phase: f64 },
    /// Constant signal. Control inlet sets the value.
    Sig { value: f32 },
    /// Signal multiplier. Inlet 0 is signal, inlet 1 sets the coefficient.
    Gain { coeff: f32 },
    /// One-block delay; the sanctioned feedback path.
    Delay1 { prev: Vec<f32> },
    /// Publishes a bang to `name` on each upward crossing of `level`.
    Thresh { level: f32, name: String, above: bool },
    /// Engine input channels as signal outlets.
    Adc,
    /// Signal inlets summed into the engine output channels.
    Dac,
    /// Receives bus messages for `name` and forwards them downstream.
    Receive { name: String },
    /// Publishes incoming messages to `name` on the bus.
    Send { name: String },
    /// Emits incoming messages as print lines on the outbound queue.
    Print { prefix: Option<String> },
    /// Logical-time bang clock. Bang or nonzero float starts it, zero or
    /// `stop` stops it; inlet 1 sets the period in milliseconds.
    Metro {
        period_ms: f32,
        next_due: Option<u64>,
    },
    /// Float storage. Hot inlet 0 sets and emits, cold inlet 1 sets only.
    FloatBox { value: f32 },
    /// Emits one bang on the first running block after load.
    Loadbang { fired: bool },
    /// Emits pitch/velocity/channel for each incoming note-on.
    Notein,
    /// Sends a note-on outward when a pitch arrives on inlet 0.
    Noteout { velocity: f32, channel: f32 },
}

impl ObjectKind {
    /// The patch-source type name.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Osc { .. } => "osc~",
            Self::Phasor { .. } => "phasor~",
            Self::Sig { .. } => "sig~",
            Self::Gain { .. } => "*~",
            Self::Delay1 { .. } => "delay1~",
            Self::Thresh { .. } => "thresh~",
            Self::Adc => "adc~",
            Self::Dac => "dac~",
            Self::Receive { .. } => "receive",
            Self::Send { .. } => "send",
            Self::Print { .. } => "print",
            Self::Metro { .. } => "metro",
            Self::FloatBox { .. } => "float",
            Self::Loadbang { .. } => "loadbang",
            Self::Notein => "notein",
            Self::Noteout { .. } => "noteout",
        }
    }

    /// Inlet domains, leftmost first.
    pub(crate) fn inlets(&self, config: &EngineConfig) -> Vec<PortDomain> {
        use PortDomain::{Control, Signal};
        match self {
            Self::Osc { .. } | Self::Phasor { .. } | Self::Sig { .. } => vec![Control],
            Self::Gain { .. } => vec![Signal, Control],
            Self::Delay1 { .. } | Self::Thresh { .. } => vec![Signal],
            Self::Adc | Self::Receive { .. } | Self::Loadbang { .. } | Self::Notein => vec![],
            Self::Dac => vec![Signal; config.output_channels],
            Self::Send { .. } | Self::Print { .. } => vec![Control],
            Self::Metro { .. } | Self::FloatBox { .. } => vec![Control, Control],
            Self::Noteout { .. } => vec![Control, Control, Control],
        }
    }

    /// Outlet domains, leftmost first.
    pub(crate) fn outlets(&self, config: &EngineConfig) -> Vec<PortDomain> {
        use PortDomain::{Control, Signal};
        match self {
            Self::Osc { .. }
            | Self::Phasor { .. }
            | Self::Sig { .. }
            | Self::Gain { .. }
            | Self::Delay1 { .. } => vec![Signal],
            Self::Adc => vec![Signal; config.input_channels.max(1)],
            Self::Thresh { .. }
            | Self::Dac
            | Self::Send { .. }
            | Self::Print { .. }
            | Self::Noteout { .. } => vec![],
            Self::Receive { .. } | Self::Metro { .. } | Self::FloatBox { .. }
            | Self::Loadbang { .. } => vec![Control],
            Self::Notein => vec![Control; 3],
        }
    }

}

/// One object instance inside a patch.
#[derive(Debug)]
pub(crate) struct Node {
    /// Author-assigned id from the patch source.
    pub id: u32,
    pub kind: ObjectKind,
    /// Cached inlet domains.
    pub in_domains: Vec<PortDomain>,
    /// Cached outlet domains.
    pub out_domains: Vec<PortDomain>,
    /// Per-outlet fan-out: `(target node index, target inlet)` in
    /// connection order.
    pub outs: Vec<Vec<(usize, usize)>>,
    /// Per-inlet signal scratch, `block_size` samples for signal inlets,
    /// empty for control inlets. Fan-in is summed here before processing.
    pub in_bufs: Vec<Vec<f32>>,
}

impl Node {
    pub(crate) fn new(id: u32, kind: ObjectKind, config: &EngineConfig) -> Self {
        let in_domains = kind.inlets(config);
        let out_domains = kind.outlets(config);
        let in_bufs = in_domains
            .iter()
            .map(|d| match d {
                PortDomain::Signal => vec![0.0; config.block_size],
                PortDomain::Control => Vec::new(),
            })
            .collect();
        let outs = vec![Vec::new(); out_domains.len()];
        Self {
            id,
            kind,
            in_domains,
            out_domains,
            outs,
            in_bufs,
        }
    }

    /// `type_name (object id)`, for diagnostics.
    pub(crate) fn describe(&self) -> String {
        format!("{} (object {})", self.kind.type_name(), self.id)
    }

    /// Applies one control message to `inlet`, updating object state.
    ///
    /// Routing side effects (emitting from outlets, publishing, crossing
    /// the outbound queue) are the engine's job; the returned action tells
    /// it what to do.
    pub(crate) fn accept(&mut self, inlet: usize, msg: &Message) -> ControlAction {
        match &mut self.kind {
            ObjectKind::Osc { freq, .. } | ObjectKind::Phasor { freq, .. } => {
                if let Some(v) = msg.as_float() {
                    *freq = v;
                }
                ControlAction::None
            }
            ObjectKind::Sig { value } => {
                if let Some(v) = msg.as_float() {
                    *value = v;
                }
                ControlAction::None
            }
            ObjectKind::Gain { coeff } => {
                if inlet == 1 && let Some(v) = msg.as_float() {
                    *coeff = v;
                }
                ControlAction::None
            }
            ObjectKind::Receive { .. } => ControlAction::Emit {
                outlet: 0,
                message: msg.clone(),
            },
            ObjectKind::Send { name } => ControlAction::Publish {
                name: name.clone(),
                message: msg.clone(),
            },
            ObjectKind::Print { prefix } => {
                let line = match prefix {
                    Some(p) => format!("{p}: {msg}"),
                    None => msg.to_string(),
                };
                ControlAction::Print(line)
            }
            ObjectKind::Metro {
                period_ms,
                next_due,
            } => {
                if inlet == 1 {
                    if let Some(v) = msg.as_float() && v > 0.0 {
                        *period_ms = v;
                    }
                    return ControlAction::None;
                }
                match msg {
                    Message::Bang => ControlAction::StartClock,
                    Message::Symbol(s) if s == "stop" => {
                        *next_due = None;
                        ControlAction::None
                    }
                    _ => match msg.as_float() {
                        Some(v) if v != 0.0 => ControlAction::StartClock,
                        Some(_) => {
                            *next_due = None;
                            ControlAction::None
                        }
                        None => ControlAction::None,
                    },
                }
            }
            ObjectKind::FloatBox { value } => {
                if inlet == 1 {
                    if let Some(v) = msg.as_float() {
                        *value = v;
                    }
                    return ControlAction::None;
                }
                match msg {
                    Message::Bang => ControlAction::Emit {
                        outlet: 0,
                        message: Message::Float(*value),
                    },
                    _ => {
                        if let Some(v) = msg.as_float() {
                            *value = v;
                            ControlAction::Emit {
                                outlet: 0,
                                message: Message::Float(v),
                            }
                        } else {
                            ControlAction::None
                        }
                    }
                }
            }
            ObjectKind::Noteout { velocity, channel } => match inlet {
                0 => msg.as_float().map_or(ControlAction::None, |pitch| {
                    ControlAction::NoteOut {
                        pitch,
                        velocity: *velocity,
                        channel: *channel,
                    }
                }),
                1 => {
                    if let Some(v) = msg.as_float() {
                        *velocity = v;
                    }
                    ControlAction::None
                }
                _ => {
                    if let Some(v) = msg.as_float() {
                        *channel = v;
                    }
                    ControlAction::None
                }
            },
            // No control inlets on these.
            ObjectKind::Delay1 { .. }
            | ObjectKind::Thresh { .. }
            | ObjectKind::Adc
            | ObjectKind::Dac
            | ObjectKind::Loadbang { .. }
            | ObjectKind::Notein => ControlAction::None,
        }
    }

    /// Renders one block. `outs` are this node's outlet buffers; `ctx`
    /// carries engine I/O channels and the control-emit scratch.
    pub(crate) fn process_signal(&mut self, ctx: &mut SignalCtx<'_>, outs: &mut [Vec<f32>]) {
        let block = ctx.block_size;
        match &mut self.kind {
            ObjectKind::Osc { freq, phase } => {
                let step = f64::from(*freq) / f64::from(ctx.sample_rate);
                let out = &mut outs[0];
                for sample in out.iter_mut().take(block) {
                    *sample = (TAU * *phase).sin() as f32;
                    *phase = (*phase + step).rem_euclid(1.0);
                }
            }
            ObjectKind::Phasor { freq, phase } => {
                let step = f64::from(*freq) / f64::from(ctx.sample_rate);
                let out = &mut outs[0];
                for sample in out.iter_mut().take(block) {
                    *sample = *phase as f32;
                    *phase = (*phase + step).rem_euclid(1.0);
                }
            }
            ObjectKind::Sig { value } => {
                outs[0][..block].fill(*value);
            }
            ObjectKind::Gain { coeff } => {
                let input = &self.in_bufs[0];
                let out = &mut outs[0];
                for i in 0..block {
                    out[i] = input[i] * *coeff;
                }
            }
            ObjectKind::Delay1 { prev } => {
                outs[0][..block].copy_from_slice(&prev[..block]);
            }
            ObjectKind::Thresh { level, name, above } => {
                let input = &self.in_bufs[0];
                for i in 0..block {
                    let now_above = input[i] > *level;
                    if now_above && !*above {
                        ctx.emits.push((name.clone(), Message::Bang));
                    }
                    *above = now_above;
                }
            }
            ObjectKind::Adc => {
                for (ch, out) in outs.iter_mut().enumerate() {
                    match ctx.input.get(ch) {
                        Some(channel) => out[..block].copy_from_slice(&channel[..block]),
                        None => out[..block].fill(0.0),
                    }
                }
            }
            ObjectKind::Dac => {
                for (ch, input) in self.in_bufs.iter().enumerate() {
                    let out = &mut ctx.output[ch];
                    for i in 0..block {
                        out[i] += input[i];
                    }
                }
            }
            // Control-only objects never appear in a signal schedule.
            _ => {}
        }
    }
}

/// What a control message asked the engine to do next.
#[derive(Debug, PartialEq)]
pub(crate) enum ControlAction {
    /// Nothing further; state may have been updated.
    None,
    /// Forward `message` from this node's `outlet`.
    Emit { outlet: usize, message: Message },
    /// Publish `message` on the bus under `name`.
    Publish { name: String, message: Message },
    /// Emit a print line on the outbound queue.
    Print(String),
    /// (Re)arm this metro at the current logical time.
    StartClock,
    /// Send a note-on outward.
    NoteOut { pitch: f32, velocity: f32, channel: f32 },
}

/// Per-block context handed to [`Node::process_signal`].
pub(crate) struct SignalCtx<'a> {
    pub sample_rate: f32,
    pub block_size: usize,
    /// Deinterleaved engine input, one `block_size` buffer per channel.
    pub input: &'a [Vec<f32>],
    /// Deinterleaved output accumulators; `dac~` sums into these.
    pub output: &'a mut [Vec<f32>],
    /// Control messages generated during the signal pass, published by the
    /// engine after the pass completes.
    pub emits: &'a mut Vec<(String, Message)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig {
            block_size: 8,
            input_channels: 1,
            ..EngineConfig::default()
        }
    }

    fn ctx_parts() -> (Vec<Vec<f32>>, Vec<Vec<f32>>, Vec<(String, Message)>) {
        (vec![vec![0.0; 8]], vec![vec![0.0; 8], vec![0.0; 8]], Vec::new())
    }

    #[test]
    fn port_domains_match_object_shape() {
        let config = cfg();
        let gain = ObjectKind::Gain { coeff: 1.0 };
        assert_eq!(
            gain.inlets(&config),
            vec![PortDomain::Signal, PortDomain::Control]
        );
        assert_eq!(gain.outlets(&config), vec![PortDomain::Signal]);

        let dac = ObjectKind::Dac;
        assert_eq!(
            dac.inlets(&config),
            vec![PortDomain::Signal; config.output_channels]
        );
        assert!(dac.outlets(&config).is_empty());

        let metro = ObjectKind::Metro {
            period_ms: 100.0,
            next_due: None,
        };
        assert!(!metro.inlets(&config).contains(&PortDomain::Signal));
        assert!(!metro.outlets(&config).contains(&PortDomain::Signal));
    }

    #[test]
    fn sig_fills_constant() {
        let config = cfg();
        let mut node = Node::new(0, ObjectKind::Sig { value: 0.5 }, &config);
        let (input, mut output, mut emits) = ctx_parts();
        let mut ctx = SignalCtx {
            sample_rate: 48000.0,
            block_size: 8,
            input: &input,
            output: &mut output,
            emits: &mut emits,
        };
        let mut outs = vec![vec![0.0; 8]];
        node.process_signal(&mut ctx, &mut outs);
        assert!(outs[0].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn osc_starts_at_zero_phase_and_stays_bounded() {
        let config = cfg();
        let mut node = Node::new(
            0,
            ObjectKind::Osc {
                freq: 1000.0,
                phase: 0.0,
            },
            &config,
        );
        let (input, mut output, mut emits) = ctx_parts();
        let mut ctx = SignalCtx {
            sample_rate: 48000.0,
            block_size: 8,
            input: &input,
            output: &mut output,
            emits: &mut emits,
        };
        let mut outs = vec![vec![0.0; 8]];
        node.process_signal(&mut ctx, &mut outs);
        assert_eq!(outs[0][0], 0.0);
        assert!(outs[0].iter().all(|s| s.abs() <= 1.0));
        assert!(outs[0][1] > 0.0);
    }

    #[test]
    fn gain_scales_inlet_scratch() {
        let config = cfg();
        let mut node = Node::new(0, ObjectKind::Gain { coeff: 0.25 }, &config);
        node.in_bufs[0].copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, -4.0]);
        let (input, mut output, mut emits) = ctx_parts();
        let mut ctx = SignalCtx {
            sample_rate: 48000.0,
            block_size: 8,
            input: &input,
            output: &mut output,
            emits: &mut emits,
        };
        let mut outs = vec![vec![0.0; 8]];
        node.process_signal(&mut ctx, &mut outs);
        assert_eq!(outs[0][1], 0.5);
        assert_eq!(outs[0][7], -1.0);
    }

    #[test]
    fn thresh_emits_once_per_upward_crossing() {
        let config = cfg();
        let mut node = Node::new(
            0,
            ObjectKind::Thresh {
                level: 0.5,
                name: "hit".into(),
                above: false,
            },
            &config,
        );
        node.in_bufs[0].copy_from_slice(&[0.0, 0.6, 0.7, 0.2, 0.9, 0.9, 0.1, 0.8]);
        let (input, mut output, mut emits) = ctx_parts();
        let mut ctx = SignalCtx {
            sample_rate: 48000.0,
            block_size: 8,
            input: &input,
            output: &mut output,
            emits: &mut emits,
        };
        node.process_signal(&mut ctx, &mut []);
        assert_eq!(emits.len(), 3);
        assert!(emits.iter().all(|(n, m)| n == "hit" && *m == Message::Bang));
    }

    #[test]
    fn float_box_hot_and_cold_inlets() {
        let config = cfg();
        let mut node = Node::new(0, ObjectKind::FloatBox { value: 0.0 }, &config);

        assert_eq!(node.accept(1, &Message::Float(7.0)), ControlAction::None);
        assert_eq!(
            node.accept(0, &Message::Bang),
            ControlAction::Emit {
                outlet: 0,
                message: Message::Float(7.0)
            }
        );
        assert_eq!(
            node.accept(0, &Message::Float(3.0)),
            ControlAction::Emit {
                outlet: 0,
                message: Message::Float(3.0)
            }
        );
    }

    #[test]
    fn metro_start_stop() {
        let config = cfg();
        let mut node = Node::new(
            0,
            ObjectKind::Metro {
                period_ms: 100.0,
                next_due: Some(5),
            },
            &config,
        );
        assert_eq!(node.accept(0, &Message::Bang), ControlAction::StartClock);
        assert_eq!(node.accept(0, &Message::Float(0.0)), ControlAction::None);
        assert!(matches!(
            node.kind,
            ObjectKind::Metro { next_due: None, .. }
        ));
    }
}
