//! Engine lifecycle, block processor, and the public control API.
//!
//! The engine is split across a domain boundary. Control-side state
//! (subscriber sinks, the staged message builder, the outbound consumer)
//! lives on [`Engine`] and is touched only by caller threads. Shared state
//! (patches, bus endpoints, arrays, the logical clock) sits behind one
//! coarse mutex that the audio context acquires exactly once per block;
//! structural edits take the same mutex, so a `close` issued mid-block
//! lands at the block boundary. Everything else crossing the boundary
//! rides the bounded queues.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::bus::{MessageBus, MessageStage};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::object::{ControlAction, ObjectKind, SignalCtx};
use crate::graph::parse;
use crate::graph::patch::{Patch, PatchId};
use crate::graph::schedule::Schedule;
use crate::message::{Atom, Message, MessageSink, MidiEvent};
use crate::queue::{EventPayload, EventReceiver, EventSender, QueueEntry, event_queue};

/// Control recursion cap, counted per connection hop and per bus
/// re-publish. A send/receive loop trips it and reports a fault instead
/// of overflowing the stack; any realistic straight-line chain stays far
/// below it.
const MAX_MESSAGE_DEPTH: u32 = 1000;

/// Lifecycle state of the engine.
///
/// `Released` is terminal: a released engine cannot be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Fresh engine, not yet configured.
    Uninitialized,
    /// Configured; DSP off, blocks render silence.
    Ready,
    /// Configured with DSP on; blocks advance the patch graphs.
    Running,
    /// Torn down. Terminal.
    Released,
}

/// Token returned by [`Engine::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct ArrayData {
    owner: PatchId,
    data: Vec<f32>,
}

struct Core {
    state: EngineState,
    config: EngineConfig,
    patches: Vec<Option<Patch>>,
    bus: MessageBus,
    arrays: HashMap<String, ArrayData>,
    inbound_rx: Option<EventReceiver>,
    outbound_tx: Option<EventSender>,
    /// Logical time in samples; advances only while `Running`.
    now: u64,
    block_index: u64,
    input_scratch: Vec<Vec<f32>>,
    output_scratch: Vec<Vec<f32>>,
    inbound_scratch: Vec<QueueEntry>,
    emit_scratch: Vec<(String, Message)>,
    clock_scratch: Vec<(usize, usize)>,
}

impl Core {
    fn empty() -> Self {
        Self {
            state: EngineState::Uninitialized,
            config: EngineConfig::default(),
            patches: Vec::new(),
            bus: MessageBus::new(),
            arrays: HashMap::new(),
            inbound_rx: None,
            outbound_tx: None,
            now: 0,
            block_index: 0,
            input_scratch: Vec::new(),
            output_scratch: Vec::new(),
            inbound_scratch: Vec::new(),
            emit_scratch: Vec::new(),
            clock_scratch: Vec::new(),
        }
    }

    fn require_loaded(&self) -> Result<()> {
        match self.state {
            EngineState::Uninitialized | EngineState::Released => {
                Err(EngineError::NotInitialized)
            }
            EngineState::Ready | EngineState::Running => Ok(()),
        }
    }

    fn push_out(&self, payload: EventPayload) {
        if let Some(tx) = &self.outbound_tx {
            tx.push_or_drop(QueueEntry {
                time: self.now,
                payload,
            });
        }
    }

    /// Delivers `msg` to every `receive` endpoint for `name` and, when a
    /// subscription is live, mirrors it onto the outbound queue.
    fn publish(&mut self, name: &str, msg: &Message, depth: u32) {
        if depth > MAX_MESSAGE_DEPTH {
            self.push_out(EventPayload::Fault {
                block: self.block_index,
                reason: format!("message loop through '{name}'"),
            });
            return;
        }
        self.clock_scratch.clear();
        let mut targets = std::mem::take(&mut self.clock_scratch);
        for (pidx, slot) in self.patches.iter().enumerate() {
            let Some(patch) = slot else { continue };
            for (nidx, node) in patch.nodes.iter().enumerate() {
                if matches!(&node.kind, ObjectKind::Receive { name: n } if n == name) {
                    targets.push((pidx, nidx));
                }
            }
        }
        for &(pidx, nidx) in &targets {
            self.deliver(pidx, nidx, 0, msg, depth);
        }
        targets.clear();
        self.clock_scratch = targets;

        if self.bus.has_subscription(name) {
            self.push_out(EventPayload::Channel {
                name: name.to_owned(),
                message: msg.clone(),
            });
        }
    }

    /// Applies one message to one inlet and routes the resulting action.
    fn deliver(&mut self, pidx: usize, nidx: usize, inlet: usize, msg: &Message, depth: u32) {
        if depth > MAX_MESSAGE_DEPTH {
            self.push_out(EventPayload::Fault {
                block: self.block_index,
                reason: "message forwarding depth exceeded".into(),
            });
            return;
        }
        let action = {
            let Some(patch) = self.patches.get_mut(pidx).and_then(Option::as_mut) else {
                return;
            };
            let Some(node) = patch.nodes.get_mut(nidx) else {
                return;
            };
            node.accept(inlet, msg)
        };
        match action {
            ControlAction::None => {}
            ControlAction::Emit { outlet, message } => {
                self.emit_from(pidx, nidx, outlet, &message, depth);
            }
            ControlAction::Publish { name, message } => {
                self.publish(&name, &message, depth + 1);
            }
            ControlAction::Print(line) => self.push_out(EventPayload::Print(line)),
            ControlAction::StartClock => {
                let now = self.now;
                if let Some(patch) = self.patches.get_mut(pidx).and_then(Option::as_mut)
                    && let Some(node) = patch.nodes.get_mut(nidx)
                    && let ObjectKind::Metro { next_due, .. } = &mut node.kind
                {
                    *next_due = Some(now);
                }
            }
            ControlAction::NoteOut {
                pitch,
                velocity,
                channel,
            } => {
                self.push_out(EventPayload::Midi(MidiEvent::NoteOn {
                    channel: (channel as i64).clamp(0, 15) as u8,
                    pitch: (pitch as i64).clamp(0, 127) as u8,
                    velocity: (velocity as i64).clamp(0, 127) as u8,
                }));
            }
        }
    }

    /// Fans `msg` out from a node outlet to its targets in connection order.
    fn emit_from(&mut self, pidx: usize, nidx: usize, outlet: usize, msg: &Message, depth: u32) {
        let targets = {
            let Some(patch) = self.patches.get(pidx).and_then(Option::as_ref) else {
                return;
            };
            let Some(node) = patch.nodes.get(nidx) else {
                return;
            };
            match node.outs.get(outlet) {
                Some(targets) => targets.clone(),
                None => return,
            }
        };
        for (target, inlet) in targets {
            self.deliver(pidx, target, inlet, msg, depth + 1);
        }
    }

    fn deliver_midi(&mut self, event: MidiEvent) {
        let MidiEvent::NoteOn {
            channel,
            pitch,
            velocity,
        } = event
        else {
            // No object consumes these kinds; pass them through so the
            // control side still observes them.
            self.push_out(EventPayload::Midi(event));
            return;
        };
        let mut targets = std::mem::take(&mut self.clock_scratch);
        targets.clear();
        for (pidx, slot) in self.patches.iter().enumerate() {
            let Some(patch) = slot else { continue };
            for (nidx, node) in patch.nodes.iter().enumerate() {
                if matches!(node.kind, ObjectKind::Notein) {
                    targets.push((pidx, nidx));
                }
            }
        }
        for &(pidx, nidx) in &targets {
            // Rightmost outlet first, the usual right-to-left convention.
            self.emit_from(pidx, nidx, 2, &Message::Float(f32::from(channel)), 0);
            self.emit_from(pidx, nidx, 1, &Message::Float(f32::from(velocity)), 0);
            self.emit_from(pidx, nidx, 0, &Message::Float(f32::from(pitch)), 0);
        }
        targets.clear();
        self.clock_scratch = targets;
    }

    /// Fires loadbangs and due metros for the window ending at `end`.
    fn run_clocks(&mut self, end: u64) {
        let mut due = std::mem::take(&mut self.clock_scratch);
        due.clear();
        for (pidx, slot) in self.patches.iter_mut().enumerate() {
            let Some(patch) = slot else { continue };
            for (nidx, node) in patch.nodes.iter_mut().enumerate() {
                if let ObjectKind::Loadbang { fired } = &mut node.kind
                    && !*fired
                {
                    *fired = true;
                    due.push((pidx, nidx));
                }
            }
        }
        for &(pidx, nidx) in &due {
            self.emit_from(pidx, nidx, 0, &Message::Bang, 0);
        }
        due.clear();
        self.clock_scratch = due;

        let sample_rate = f64::from(self.config.sample_rate);
        loop {
            // One metro fire per pass; state is re-read every time because a
            // bang may stop or retune any metro, including its own source.
            let mut fire: Option<(usize, usize)> = None;
            'scan: for (pidx, slot) in self.patches.iter_mut().enumerate() {
                let Some(patch) = slot else { continue };
                for (nidx, node) in patch.nodes.iter_mut().enumerate() {
                    if let ObjectKind::Metro {
                        period_ms,
                        next_due,
                    } = &mut node.kind
                        && let Some(t) = *next_due
                        && t < end
                    {
                        let period = ((f64::from(*period_ms) / 1000.0) * sample_rate)
                            .round()
                            .max(1.0) as u64;
                        *next_due = Some(t + period);
                        fire = Some((pidx, nidx));
                        break 'scan;
                    }
                }
            }
            match fire {
                Some((pidx, nidx)) => self.emit_from(pidx, nidx, 0, &Message::Bang, 0),
                None => break,
            }
        }
    }

    /// Renders one block into `output` (interleaved, exactly
    /// `block_size * output_channels` samples).
    fn process_block(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        match self.state {
            EngineState::Uninitialized | EngineState::Released => {
                output.fill(0.0);
                return Err(EngineError::NotInitialized);
            }
            EngineState::Ready => {
                output.fill(0.0);
                return Ok(());
            }
            EngineState::Running => {}
        }
        let block = self.config.block_size;
        let channels = self.config.output_channels;
        let in_channels = self.config.input_channels;
        let end = self.now + block as u64;

        for (ch, buf) in self.input_scratch.iter_mut().enumerate() {
            for (i, sample) in buf.iter_mut().enumerate().take(block) {
                *sample = input.get(i * in_channels + ch).copied().unwrap_or(0.0);
            }
        }
        for buf in &mut self.output_scratch {
            buf.fill(0.0);
        }

        let mut pending = std::mem::take(&mut self.inbound_scratch);
        pending.clear();
        if let Some(rx) = &mut self.inbound_rx {
            rx.drain_due(end, |entry| pending.push(entry));
        }
        for entry in pending.drain(..) {
            match entry.payload {
                EventPayload::Channel { name, message } => self.publish(&name, &message, 0),
                EventPayload::Midi(event) => self.deliver_midi(event),
                EventPayload::Print(_) | EventPayload::Fault { .. } => {}
            }
        }
        self.inbound_scratch = pending;

        self.run_clocks(end);

        let mut emits = std::mem::take(&mut self.emit_scratch);
        emits.clear();
        for slot in &mut self.patches {
            let Some(patch) = slot else { continue };
            let mut ctx = SignalCtx {
                sample_rate: self.config.sample_rate as f32,
                block_size: block,
                input: &self.input_scratch,
                output: &mut self.output_scratch,
                emits: &mut emits,
            };
            patch.schedule.run(&mut patch.nodes, &mut patch.pool, &mut ctx);
        }
        for (name, msg) in emits.drain(..) {
            self.publish(&name, &msg, 0);
        }
        self.emit_scratch = emits;

        let faulted = self
            .output_scratch
            .iter()
            .any(|buf| buf.iter().any(|s| !s.is_finite()));
        if faulted {
            for buf in &mut self.output_scratch {
                buf.fill(0.0);
            }
            self.push_out(EventPayload::Fault {
                block: self.block_index,
                reason: "non-finite sample in block output".into(),
            });
        }

        for (i, frame) in output.chunks_exact_mut(channels).take(block).enumerate() {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.output_scratch[ch][i];
            }
        }

        self.now = end;
        self.block_index += 1;
        Ok(())
    }
}

/// The patch-graph engine. See the crate docs for the domain model.
pub struct Engine {
    shared: Arc<Mutex<Core>>,
    inbound_tx: Option<EventSender>,
    outbound_rx: Option<EventReceiver>,
    outbound_probe: Option<EventSender>,
    dropped_seen: u64,
    subscribers: HashMap<String, Vec<(u64, Box<dyn MessageSink + Send>)>>,
    next_subscription: u64,
    stage: MessageStage,
    search_paths: Vec<PathBuf>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(shared: &Arc<Mutex<Core>>) -> MutexGuard<'_, Core> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    /// Creates an uninitialized engine. Call [`init`](Self::init) next.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Core::empty())),
            inbound_tx: None,
            outbound_rx: None,
            outbound_probe: None,
            dropped_seen: 0,
            subscribers: HashMap::new(),
            next_subscription: 0,
            stage: MessageStage::default(),
            search_paths: Vec::new(),
        }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        lock(&self.shared)
    }

    /// Configures the engine and moves it to `Ready`.
    ///
    /// Re-initializing from `Ready` starts a fresh session: open patches,
    /// registrations, and the logical clock are discarded. Initializing a
    /// `Running` or `Released` engine fails.
    pub fn init(&mut self, config: EngineConfig) -> Result<()> {
        config.validate().map_err(EngineError::Config)?;
        let mut core = self.core();
        match core.state {
            EngineState::Uninitialized | EngineState::Ready => {}
            EngineState::Running | EngineState::Released => {
                return Err(EngineError::NotInitialized);
            }
        }
        let (in_tx, in_rx) = event_queue(config.queue_capacity);
        let (out_tx, out_rx) = event_queue(config.queue_capacity);
        core.patches.clear();
        core.bus = MessageBus::new();
        core.arrays.clear();
        core.config = config;
        core.inbound_rx = Some(in_rx);
        core.outbound_tx = Some(out_tx.clone());
        core.now = 0;
        core.block_index = 0;
        core.input_scratch = vec![vec![0.0; config.block_size]; config.input_channels];
        core.output_scratch = vec![vec![0.0; config.block_size]; config.output_channels];
        core.inbound_scratch = Vec::with_capacity(config.queue_capacity.min(256));
        core.emit_scratch = Vec::with_capacity(64);
        core.clock_scratch = Vec::with_capacity(16);
        core.state = EngineState::Ready;
        drop(core);

        self.inbound_tx = Some(in_tx);
        self.outbound_rx = Some(out_rx);
        self.outbound_probe = Some(out_tx);
        self.dropped_seen = 0;
        self.subscribers.clear();
        info!(
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            inputs = config.input_channels,
            outputs = config.output_channels,
            "engine initialized"
        );
        Ok(())
    }

    /// Tears the engine down. Terminal; every subsequent operation fails
    /// with [`EngineError::NotInitialized`], including a second release.
    pub fn release(&mut self) -> Result<()> {
        let mut core = self.core();
        core.require_loaded()?;
        core.patches.clear();
        core.bus = MessageBus::new();
        core.arrays.clear();
        core.inbound_rx = None;
        core.outbound_tx = None;
        core.state = EngineState::Released;
        drop(core);
        self.inbound_tx = None;
        self.outbound_rx = None;
        self.outbound_probe = None;
        self.subscribers.clear();
        info!("engine released");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.core().state
    }

    /// Active configuration.
    pub fn config(&self) -> Result<EngineConfig> {
        let core = self.core();
        core.require_loaded()?;
        Ok(core.config)
    }

    /// Frames per processing block.
    pub fn block_size(&self) -> Result<usize> {
        Ok(self.config()?.block_size)
    }

    /// Logical time in samples; advances only while running.
    pub fn logical_time(&self) -> Result<u64> {
        let core = self.core();
        core.require_loaded()?;
        Ok(core.now)
    }

    /// Turns block processing on (`Running`) or off (`Ready`).
    pub fn dsp(&self, on: bool) -> Result<()> {
        let mut core = self.core();
        core.require_loaded()?;
        let next = if on {
            EngineState::Running
        } else {
            EngineState::Ready
        };
        if core.state != next {
            core.state = next;
            info!(on, "dsp switched");
        }
        Ok(())
    }

    /// Parses and opens a patch from in-memory source.
    pub fn load_str(&self, source: &str) -> Result<PatchId> {
        self.load_named("inline", source)
    }

    /// Appends a directory that [`load_file`](Self::load_file) consults
    /// when a relative patch path does not resolve from the working
    /// directory. Directories are tried in insertion order.
    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        debug!(dir = %dir.display(), "search path added");
        self.search_paths.push(dir);
    }

    /// Clears the search-path list.
    pub fn clear_search_paths(&mut self) {
        self.search_paths.clear();
    }

    fn resolve_patch_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.exists() {
            return path.to_owned();
        }
        for dir in &self.search_paths {
            let candidate = dir.join(path);
            if candidate.exists() {
                return candidate;
            }
        }
        path.to_owned()
    }

    /// Reads, parses, and opens a patch file. Relative paths that do not
    /// resolve from the working directory are tried against the engine's
    /// search paths.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PatchId> {
        let path = self.resolve_patch_path(path.as_ref());
        let source = std::fs::read_to_string(&path).map_err(|source| EngineError::PatchIo {
            path: path.clone(),
            source,
        })?;
        let name = path
            .file_stem()
            .map_or_else(|| "patch".to_owned(), |s| s.to_string_lossy().into_owned());
        self.load_named(&name, &source)
    }

    fn load_named(&self, name: &str, source: &str) -> Result<PatchId> {
        // Parse and compile before taking the core mutex; the audio
        // context acquires that mutex every block and must not wait out a
        // large patch build. The lock covers only the constant-time
        // install below.
        let config = {
            let core = self.core();
            core.require_loaded()?;
            core.config
        };
        let parsed = parse::parse(source, &config)?;
        let schedule = Schedule::compile(&parsed.nodes)?;
        let pool = vec![vec![0.0; config.block_size]; schedule.pool_size()];

        let mut core = self.core();
        core.require_loaded()?;
        for (array_name, _, line) in &parsed.arrays {
            if core.arrays.contains_key(array_name) {
                return Err(EngineError::invalid_patch(
                    *line,
                    format!("array '{array_name}' is already registered"),
                ));
            }
        }
        let id = PatchId(core.patches.len() as u32);

        let patch = Patch {
            name: name.to_owned(),
            nodes: parsed.nodes,
            schedule,
            pool,
            array_names: parsed.arrays.iter().map(|(n, _, _)| n.clone()).collect(),
        };
        for (endpoint, is_receive) in patch.endpoint_names() {
            if is_receive {
                core.bus.add_receive_object(endpoint);
            } else {
                core.bus.add_send_object(endpoint);
            }
        }
        for (array_name, size, _) in parsed.arrays {
            core.arrays.insert(
                array_name,
                ArrayData {
                    owner: id,
                    data: vec![0.0; size],
                },
            );
        }
        let objects = patch.nodes.len();
        core.patches.push(Some(patch));
        debug!(patch = %id, name, objects, "patch opened");
        Ok(id)
    }

    /// Closes a patch, releasing its objects and unregistering its names.
    pub fn close(&self, id: PatchId) -> Result<()> {
        let mut core = self.core();
        core.require_loaded()?;
        let patch = core
            .patches
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(EngineError::UnknownHandle(id))?;
        for (endpoint, is_receive) in patch.endpoint_names() {
            if is_receive {
                core.bus.remove_receive_object(endpoint);
            } else {
                core.bus.remove_send_object(endpoint);
            }
        }
        for array_name in &patch.array_names {
            core.arrays.remove(array_name);
        }
        debug!(patch = %id, name = patch.name, "patch closed");
        Ok(())
    }

    /// True iff any live endpoint bears `name`.
    pub fn exists(&self, name: &str) -> Result<bool> {
        let core = self.core();
        core.require_loaded()?;
        Ok(core.bus.exists(name))
    }

    fn send_inner(&self, name: &str, message: Message) -> Result<bool> {
        let time = {
            let core = self.core();
            core.require_loaded()?;
            if !core.bus.has_receiver(name) {
                return Ok(false);
            }
            core.now
        };
        let tx = self.inbound_tx.as_ref().ok_or(EngineError::NotInitialized)?;
        tx.push(QueueEntry {
            time,
            payload: EventPayload::Channel {
                name: name.to_owned(),
                message,
            },
        })?;
        Ok(true)
    }

    /// Sends a bang; returns whether any receiver endpoint was live.
    pub fn send_bang(&self, name: &str) -> Result<bool> {
        self.send_inner(name, Message::Bang)
    }

    /// Sends a float; returns whether any receiver endpoint was live.
    pub fn send_float(&self, name: &str, value: f32) -> Result<bool> {
        self.send_inner(name, Message::Float(value))
    }

    /// Sends a symbol; returns whether any receiver endpoint was live.
    pub fn send_symbol(&self, name: &str, value: &str) -> Result<bool> {
        self.send_inner(name, Message::Symbol(value.to_owned()))
    }

    /// Sends a list; returns whether any receiver endpoint was live.
    pub fn send_list(&self, name: &str, atoms: Vec<Atom>) -> Result<bool> {
        self.send_inner(name, Message::List(atoms))
    }

    /// Sends a typed message; returns whether any receiver endpoint was live.
    pub fn send_typed(&self, name: &str, selector: &str, args: Vec<Atom>) -> Result<bool> {
        self.send_inner(
            name,
            Message::Typed {
                selector: selector.to_owned(),
                args,
            },
        )
    }

    /// Enqueues a MIDI event for the next block.
    ///
    /// Note-on events reach `notein` objects; kinds with no consuming
    /// object pass through to the outbound queue, where
    /// [`dispatch_pending`](Self::dispatch_pending) hands them to
    /// [`MessageSink::midi`].
    pub fn send_midi(&self, event: MidiEvent) -> Result<()> {
        let time = {
            let core = self.core();
            core.require_loaded()?;
            core.now
        };
        let tx = self.inbound_tx.as_ref().ok_or(EngineError::NotInitialized)?;
        tx.push(QueueEntry {
            time,
            payload: EventPayload::Midi(event),
        })
    }

    /// Registers `sink` for messages published under `name`.
    ///
    /// The sink is invoked from [`dispatch_pending`](Self::dispatch_pending)
    /// on the calling thread, never from the audio context. Sinks for the
    /// same name fire in subscription order.
    pub fn subscribe(
        &mut self,
        name: &str,
        sink: Box<dyn MessageSink + Send>,
    ) -> Result<SubscriptionId> {
        {
            let mut core = self.core();
            core.require_loaded()?;
            core.bus.add_subscription(name);
        }
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers
            .entry(name.to_owned())
            .or_default()
            .push((id, sink));
        debug!(name, subscription = id, "subscribed");
        Ok(SubscriptionId(id))
    }

    /// Drops a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Result<()> {
        let Some(name) = self
            .subscribers
            .iter()
            .find(|(_, sinks)| sinks.iter().any(|(sid, _)| *sid == id.0))
            .map(|(name, _)| name.clone())
        else {
            return Ok(());
        };
        if let Some(sinks) = self.subscribers.get_mut(&name) {
            sinks.retain(|(sid, _)| *sid != id.0);
            if sinks.is_empty() {
                self.subscribers.remove(&name);
            }
        }
        let mut core = self.core();
        core.require_loaded()?;
        core.bus.remove_subscription(&name);
        debug!(name, subscription = id.0, "unsubscribed");
        Ok(())
    }

    /// Begins staging a compound message, discarding any previous stage.
    pub fn start_message(&mut self, capacity: usize) {
        self.stage.start(capacity);
    }

    /// Appends a float to the staged message.
    pub fn add_float(&mut self, value: f32) -> Result<()> {
        if self.stage.add(Atom::Float(value)) {
            Ok(())
        } else {
            Err(EngineError::EmptyStage)
        }
    }

    /// Appends a symbol to the staged message.
    pub fn add_symbol(&mut self, value: &str) -> Result<()> {
        if self.stage.add(Atom::from(value)) {
            Ok(())
        } else {
            Err(EngineError::EmptyStage)
        }
    }

    /// Sends the staged atoms as a list. The stage is cleared even when
    /// sending fails.
    pub fn finish_list(&mut self, name: &str) -> Result<bool> {
        let atoms = self.stage.take().ok_or(EngineError::EmptyStage)?;
        self.send_list(name, atoms)
    }

    /// Sends the staged atoms as a typed message. The stage is cleared even
    /// when sending fails.
    pub fn finish_message(&mut self, name: &str, selector: &str) -> Result<bool> {
        let atoms = self.stage.take().ok_or(EngineError::EmptyStage)?;
        self.send_typed(name, selector, atoms)
    }

    /// Declared size of a registered array.
    pub fn array_len(&self, name: &str) -> Result<usize> {
        let core = self.core();
        core.require_loaded()?;
        core.arrays
            .get(name)
            .map(|a| a.data.len())
            .ok_or_else(|| EngineError::UnknownArray(name.to_owned()))
    }

    /// Copies `out.len()` samples starting at `offset` out of an array.
    pub fn array_read(&self, name: &str, offset: usize, out: &mut [f32]) -> Result<()> {
        let core = self.core();
        core.require_loaded()?;
        let array = core
            .arrays
            .get(name)
            .ok_or_else(|| EngineError::UnknownArray(name.to_owned()))?;
        let end = check_range(name, offset, out.len(), array.data.len())?;
        out.copy_from_slice(&array.data[offset..end]);
        Ok(())
    }

    /// Writes `samples` into an array starting at `offset`. Out-of-range
    /// writes fail without touching the array.
    pub fn array_write(&self, name: &str, offset: usize, samples: &[f32]) -> Result<()> {
        let mut core = self.core();
        core.require_loaded()?;
        let array = core
            .arrays
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownArray(name.to_owned()))?;
        let end = check_range(name, offset, samples.len(), array.data.len())?;
        array.data[offset..end].copy_from_slice(samples);
        Ok(())
    }

    /// Resizes an array, zero-filling any growth.
    pub fn array_resize(&self, name: &str, len: usize) -> Result<()> {
        let mut core = self.core();
        core.require_loaded()?;
        let array = core
            .arrays
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownArray(name.to_owned()))?;
        array.data.resize(len, 0.0);
        Ok(())
    }

    /// Drains the outbound queue, invoking subscriber sinks for channel
    /// messages and `sink` for prints, MIDI, and faults. Returns the number
    /// of entries dispatched.
    pub fn dispatch_pending(&mut self, sink: &mut dyn MessageSink) -> usize {
        if let Some(probe) = &self.outbound_probe {
            let dropped = probe.dropped_count();
            if dropped > self.dropped_seen {
                warn!(count = dropped - self.dropped_seen, "outbound events dropped");
                self.dropped_seen = dropped;
            }
        }
        let Some(rx) = self.outbound_rx.as_mut() else {
            return 0;
        };
        let subscribers = &mut self.subscribers;
        let mut count = 0;
        rx.drain_all(|entry| {
            count += 1;
            match entry.payload {
                EventPayload::Channel { name, message } => {
                    if let Some(sinks) = subscribers.get_mut(&name) {
                        for (_, s) in sinks.iter_mut() {
                            message.dispatch(&name, s.as_mut());
                        }
                    }
                }
                EventPayload::Print(line) => sink.print(&line),
                EventPayload::Midi(event) => sink.midi(event),
                EventPayload::Fault { block, reason } => sink.fault(block, &reason),
            }
        });
        count
    }

    /// Renders one block. Convenience for offline and test use; real-time
    /// callers hand an [`AudioProcessor`] to the backend instead.
    pub fn process_block(&self, input: &[f32], output: &mut [f32]) -> Result<()> {
        lock(&self.shared).process_block(input, output)
    }

    /// A cloneable, `Send` handle driving the audio side of the engine.
    pub fn processor(&self) -> AudioProcessor {
        AudioProcessor {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Audio-context handle: the one object a backend callback owns.
#[derive(Clone)]
pub struct AudioProcessor {
    shared: Arc<Mutex<Core>>,
}

impl AudioProcessor {
    /// Renders one block into `output` (interleaved,
    /// `block_size * output_channels` samples). `input` is interleaved
    /// `block_size * input_channels` samples, empty when there is no input.
    pub fn process_block(&self, input: &[f32], output: &mut [f32]) -> Result<()> {
        lock(&self.shared).process_block(input, output)
    }

    /// Active configuration, when the engine is initialized.
    pub fn config(&self) -> Option<EngineConfig> {
        let core = lock(&self.shared);
        core.require_loaded().ok().map(|()| core.config)
    }
}

fn check_range(name: &str, offset: usize, len: usize, size: usize) -> Result<usize> {
    let end = offset.checked_add(len).filter(|&e| e <= size);
    end.ok_or_else(|| EngineError::OutOfRange {
        name: name.to_owned(),
        offset,
        len,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_engine() -> Engine {
        let mut engine = Engine::new();
        engine
            .init(EngineConfig {
                block_size: 16,
                ..EngineConfig::default()
            })
            .unwrap();
        engine
    }

    fn advance(engine: &Engine, blocks: usize) {
        let config = engine.config().unwrap();
        let mut out = vec![0.0; config.block_size * config.output_channels];
        for _ in 0..blocks {
            engine.process_block(&[], &mut out).unwrap();
        }
    }

    #[derive(Default)]
    struct Collect {
        floats: Vec<(String, f32)>,
        bangs: Vec<String>,
        prints: Vec<String>,
        midi: Vec<MidiEvent>,
        faults: Vec<String>,
    }
    impl MessageSink for Collect {
        fn bang(&mut self, source: &str) {
            self.bangs.push(source.to_owned());
        }
        fn float(&mut self, source: &str, value: f32) {
            self.floats.push((source.to_owned(), value));
        }
        fn print(&mut self, line: &str) {
            self.prints.push(line.to_owned());
        }
        fn midi(&mut self, event: MidiEvent) {
            self.midi.push(event);
        }
        fn fault(&mut self, _block: u64, reason: &str) {
            self.faults.push(reason.to_owned());
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let mut engine = Engine::new();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(matches!(
            engine.dsp(true),
            Err(EngineError::NotInitialized)
        ));

        engine.init(EngineConfig::default()).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        engine.dsp(true).unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        engine.dsp(false).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);

        engine.release().unwrap();
        assert_eq!(engine.state(), EngineState::Released);
        assert!(matches!(engine.release(), Err(EngineError::NotInitialized)));
        assert!(matches!(
            engine.init(EngineConfig::default()),
            Err(EngineError::NotInitialized)
        ));
        assert!(matches!(
            engine.send_bang("x"),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn ready_blocks_render_silence_without_advancing_time() {
        let engine = ready_engine();
        let mut out = vec![1.0; 16 * 2];
        engine.process_block(&[], &mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.logical_time().unwrap(), 0);
    }

    #[test]
    fn logical_time_advances_per_block() {
        let engine = ready_engine();
        engine.dsp(true).unwrap();
        advance(&engine, 5);
        assert_eq!(engine.logical_time().unwrap(), 5 * 16);
    }

    #[test]
    fn send_without_receiver_is_not_delivered() {
        let engine = ready_engine();
        assert!(!engine.send_float("nobody", 1.0).unwrap());
    }

    #[test]
    fn close_unregisters_names_and_double_close_fails() {
        let engine = ready_engine();
        let id = engine.load_str("object 1 receive tap\nobject 2 print").unwrap();
        assert!(engine.exists("tap").unwrap());
        engine.close(id).unwrap();
        assert!(!engine.exists("tap").unwrap());
        assert!(matches!(
            engine.close(id),
            Err(EngineError::UnknownHandle(_))
        ));
    }

    #[test]
    fn patch_ids_are_not_reused() {
        let engine = ready_engine();
        let a = engine.load_str("object 1 loadbang").unwrap();
        engine.close(a).unwrap();
        let b = engine.load_str("object 1 loadbang").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn failed_load_leaves_open_patches_untouched() {
        let engine = ready_engine();
        let id = engine.load_str("object 1 receive keep").unwrap();
        assert!(engine.load_str("object 1 warble~").is_err());
        assert!(engine.exists("keep").unwrap());
        engine.close(id).unwrap();
    }

    #[test]
    fn receive_print_round_trip() {
        let mut engine = ready_engine();
        engine
            .load_str("object 1 receive in\nobject 2 print tag\nconnect 1 0 2 0")
            .unwrap();
        engine.dsp(true).unwrap();
        assert!(engine.send_float("in", 3.5).unwrap());
        advance(&engine, 1);

        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(sink.prints, vec!["tag: 3.5"]);
    }

    #[derive(Clone, Default)]
    struct SharedSink {
        floats: Arc<Mutex<Vec<(String, f32)>>>,
    }
    impl MessageSink for SharedSink {
        fn float(&mut self, source: &str, value: f32) {
            lock_vec(&self.floats).push((source.to_owned(), value));
        }
    }
    fn lock_vec(v: &Arc<Mutex<Vec<(String, f32)>>>) -> MutexGuard<'_, Vec<(String, f32)>> {
        v.lock().unwrap()
    }

    #[test]
    fn subscription_receives_published_floats() {
        let mut engine = ready_engine();
        engine.dsp(true).unwrap();
        let sink = SharedSink::default();
        let sub = engine.subscribe("myfloat", Box::new(sink.clone())).unwrap();
        assert!(engine.exists("myfloat").unwrap());

        assert!(engine.send_float("myfloat", 42.0).unwrap());
        advance(&engine, 1);
        let mut outer = Collect::default();
        engine.dispatch_pending(&mut outer);
        assert_eq!(*lock_vec(&sink.floats), vec![("myfloat".to_owned(), 42.0)]);

        // After unsubscribing, a second send reaches zero sinks.
        engine.unsubscribe(sub).unwrap();
        assert!(!engine.send_float("myfloat", 7.0).unwrap());
        advance(&engine, 1);
        engine.dispatch_pending(&mut outer);
        assert_eq!(lock_vec(&sink.floats).len(), 1);
    }

    #[test]
    fn same_name_sinks_fire_in_subscription_order() {
        let mut engine = ready_engine();
        engine.dsp(true).unwrap();

        struct Tagged {
            tag: f32,
            log: Arc<Mutex<Vec<(String, f32)>>>,
        }
        impl MessageSink for Tagged {
            fn bang(&mut self, source: &str) {
                self.log.lock().unwrap().push((source.to_owned(), self.tag));
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in [1.0, 2.0, 3.0] {
            engine
                .subscribe(
                    "tick",
                    Box::new(Tagged {
                        tag,
                        log: Arc::clone(&log),
                    }),
                )
                .unwrap();
        }
        engine.send_bang("tick").unwrap();
        advance(&engine, 1);
        engine.dispatch_pending(&mut Collect::default());
        let order: Vec<f32> = log.lock().unwrap().iter().map(|(_, t)| *t).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn subscribe_alone_makes_name_receivable() {
        let mut engine = ready_engine();
        engine.dsp(true).unwrap();
        let sub = engine.subscribe("solo", Box::new(Collect::default())).unwrap();
        assert!(engine.exists("solo").unwrap());
        assert!(engine.send_bang("solo").unwrap());
        engine.unsubscribe(sub).unwrap();
        assert!(!engine.exists("solo").unwrap());
        assert!(!engine.send_bang("solo").unwrap());
    }

    #[test]
    fn builder_stages_and_clears() {
        let mut engine = ready_engine();
        engine.load_str("object 1 receive lst").unwrap();
        assert!(matches!(
            engine.finish_list("lst"),
            Err(EngineError::EmptyStage)
        ));
        assert!(matches!(engine.add_float(1.0), Err(EngineError::EmptyStage)));

        engine.start_message(3);
        engine.add_float(1.0).unwrap();
        engine.add_float(2.0).unwrap();
        engine.add_symbol("x").unwrap();
        assert!(engine.finish_list("lst").unwrap());
        // Stage is consumed.
        assert!(matches!(
            engine.finish_list("lst"),
            Err(EngineError::EmptyStage)
        ));
    }

    #[test]
    fn finish_to_missing_receiver_reports_undelivered_and_clears() {
        let mut engine = ready_engine();
        engine.start_message(1);
        engine.add_float(9.0).unwrap();
        assert!(!engine.finish_list("missing").unwrap());
        assert!(matches!(
            engine.finish_list("missing"),
            Err(EngineError::EmptyStage)
        ));
    }

    #[test]
    fn arrays_read_write_resize_and_bounds() {
        let engine = ready_engine();
        engine.load_str("array table 64").unwrap();
        assert_eq!(engine.array_len("table").unwrap(), 64);

        engine.array_write("table", 60, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut out = [0.0; 4];
        engine.array_read("table", 60, &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);

        assert!(matches!(
            engine.array_write("table", 62, &[0.0; 4]),
            Err(EngineError::OutOfRange { size: 64, .. })
        ));
        assert!(matches!(
            engine.array_len("ghost"),
            Err(EngineError::UnknownArray(_))
        ));

        engine.array_resize("table", 8).unwrap();
        assert_eq!(engine.array_len("table").unwrap(), 8);
        assert!(matches!(
            engine.array_read("table", 4, &mut out),
            Err(EngineError::OutOfRange { .. })
        ));
    }

    #[test]
    fn array_names_are_engine_global() {
        let engine = ready_engine();
        let id = engine.load_str("array shared 8").unwrap();
        let err = engine.load_str("array shared 8").unwrap_err();
        assert!(matches!(err, EngineError::InvalidPatch { .. }));
        engine.close(id).unwrap();
        assert!(matches!(
            engine.array_len("shared"),
            Err(EngineError::UnknownArray(_))
        ));
        engine.load_str("array shared 8").unwrap();
    }

    #[test]
    fn queue_full_surfaces_to_sender() {
        let mut engine = Engine::new();
        engine
            .init(EngineConfig {
                block_size: 16,
                queue_capacity: 2,
                ..EngineConfig::default()
            })
            .unwrap();
        engine.load_str("object 1 receive in").unwrap();
        assert!(engine.send_bang("in").unwrap());
        assert!(engine.send_bang("in").unwrap());
        assert!(matches!(
            engine.send_bang("in"),
            Err(EngineError::QueueFull)
        ));
    }

    #[test]
    fn loadbang_fires_once() {
        let mut engine = ready_engine();
        engine
            .load_str("object 1 loadbang\nobject 2 print\nconnect 1 0 2 0")
            .unwrap();
        engine.dsp(true).unwrap();
        advance(&engine, 3);
        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(sink.prints, vec!["bang"]);
    }

    #[test]
    fn metro_emits_at_logical_interval() {
        // 16-frame blocks at 48 kHz; metro at 1 ms = 48 samples.
        let mut engine = ready_engine();
        engine
            .load_str(
                "object 1 receive go\nobject 2 metro 1\nobject 3 print m\n\
                 connect 1 0 2 0\nconnect 2 0 3 0",
            )
            .unwrap();
        engine.dsp(true).unwrap();
        engine.send_bang("go").unwrap();
        // 9 blocks = 144 samples: fires at 0, 48, and 96.
        advance(&engine, 9);
        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(sink.prints.len(), 3);

        // The next fire at 144 lands in block 10.
        advance(&engine, 1);
        engine.dispatch_pending(&mut sink);
        assert_eq!(sink.prints.len(), 4);
    }

    #[test]
    fn deep_control_chains_are_not_reported_as_loops() {
        let mut engine = ready_engine();
        // receive -> 100 chained float boxes -> print.
        let mut source = String::from("object 1 receive in\n");
        for i in 2..=101 {
            source.push_str(&format!("object {i} float\n"));
        }
        source.push_str("object 102 print deep\n");
        for i in 1..=101 {
            source.push_str(&format!("connect {i} 0 {} 0\n", i + 1));
        }
        engine.load_str(&source).unwrap();
        engine.dsp(true).unwrap();

        engine.send_float("in", 9.0).unwrap();
        advance(&engine, 1);
        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(sink.prints, vec!["deep: 9"]);
        assert!(sink.faults.is_empty());
    }

    #[test]
    fn send_receive_loop_faults_instead_of_overflowing() {
        let mut engine = ready_engine();
        engine
            .load_str("object 1 receive a\nobject 2 send a\nconnect 1 0 2 0")
            .unwrap();
        engine.dsp(true).unwrap();
        engine.send_bang("a").unwrap();
        advance(&engine, 1);

        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(sink.faults.len(), 1);
        // The session survives the fault.
        advance(&engine, 1);
    }

    #[test]
    fn unconsumed_midi_kinds_pass_through() {
        let mut engine = ready_engine();
        engine.dsp(true).unwrap();
        engine
            .send_midi(MidiEvent::ControlChange {
                channel: 1,
                controller: 7,
                value: 100,
            })
            .unwrap();
        advance(&engine, 1);

        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(
            sink.midi,
            vec![MidiEvent::ControlChange {
                channel: 1,
                controller: 7,
                value: 100,
            }]
        );
    }

    #[test]
    fn noteout_and_notein_cross_the_boundary() {
        let mut engine = ready_engine();
        engine
            .load_str(
                "object 1 notein\nobject 2 noteout\nconnect 1 0 2 0",
            )
            .unwrap();
        engine.dsp(true).unwrap();
        engine
            .send_midi(MidiEvent::NoteOn {
                channel: 0,
                pitch: 60,
                velocity: 100,
            })
            .unwrap();
        advance(&engine, 1);
        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(
            sink.midi,
            vec![MidiEvent::NoteOn {
                channel: 0,
                pitch: 60,
                velocity: 64,
            }]
        );
    }

    #[test]
    fn non_finite_output_zero_fills_and_reports_fault() {
        let mut engine = ready_engine();
        engine
            .load_str(
                "object 1 sig~ 1\nobject 2 *~ 1\nobject 3 dac~\nobject 4 receive k\n\
                 connect 1 0 2 0\nconnect 2 0 3 0\nconnect 4 0 2 1",
            )
            .unwrap();
        engine.dsp(true).unwrap();
        engine.send_float("k", f32::INFINITY).unwrap();

        let mut out = vec![0.0; 16 * 2];
        engine.process_block(&[], &mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0.0));

        let mut sink = Collect::default();
        engine.dispatch_pending(&mut sink);
        assert_eq!(sink.faults.len(), 1);
    }

    #[test]
    fn dac_renders_signal_chain_into_output() {
        let mut engine = ready_engine();
        engine
            .load_str(
                "object 1 sig~ 0.5\nobject 2 dac~\nconnect 1 0 2 0\nconnect 1 0 2 1",
            )
            .unwrap();
        engine.dsp(true).unwrap();
        let mut out = vec![0.0; 16 * 2];
        engine.process_block(&[], &mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0.5));
        engine.release().unwrap();
    }
}
