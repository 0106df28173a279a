//! Named channel registry and the staged message builder.
//!
//! The bus tracks which names currently have live endpoints: `receive`
//! objects in open patches, `send` objects, and caller subscriptions.
//! It holds counts only; subscriber callbacks live on the control side of
//! the engine and are never visible from the audio context.

use std::collections::HashMap;

use crate::message::Atom;

#[derive(Debug, Default, Clone, Copy)]
struct Endpoints {
    receive_objects: usize,
    send_objects: usize,
    subscriptions: usize,
}

impl Endpoints {
    fn is_empty(&self) -> bool {
        self.receive_objects == 0 && self.send_objects == 0 && self.subscriptions == 0
    }
}

/// Engine-wide registry of named channels.
#[derive(Debug, Default)]
pub(crate) struct MessageBus {
    channels: HashMap<String, Endpoints>,
}

impl MessageBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, name: &str) -> &mut Endpoints {
        self.channels.entry(name.to_owned()).or_default()
    }

    fn release(&mut self, name: &str, f: impl FnOnce(&mut Endpoints)) {
        if let Some(ep) = self.channels.get_mut(name) {
            f(ep);
            if ep.is_empty() {
                self.channels.remove(name);
            }
        }
    }

    pub(crate) fn add_receive_object(&mut self, name: &str) {
        self.entry(name).receive_objects += 1;
    }

    pub(crate) fn remove_receive_object(&mut self, name: &str) {
        self.release(name, |ep| {
            ep.receive_objects = ep.receive_objects.saturating_sub(1);
        });
    }

    pub(crate) fn add_send_object(&mut self, name: &str) {
        self.entry(name).send_objects += 1;
    }

    pub(crate) fn remove_send_object(&mut self, name: &str) {
        self.release(name, |ep| {
            ep.send_objects = ep.send_objects.saturating_sub(1);
        });
    }

    pub(crate) fn add_subscription(&mut self, name: &str) {
        self.entry(name).subscriptions += 1;
    }

    pub(crate) fn remove_subscription(&mut self, name: &str) {
        self.release(name, |ep| {
            ep.subscriptions = ep.subscriptions.saturating_sub(1);
        });
    }

    /// True iff any live endpoint bears the name.
    pub(crate) fn exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// True iff a message sent to `name` would reach something: a patch
    /// `receive` object or a live subscription.
    pub(crate) fn has_receiver(&self, name: &str) -> bool {
        self.channels
            .get(name)
            .is_some_and(|ep| ep.receive_objects > 0 || ep.subscriptions > 0)
    }

    /// True iff at least one subscription is live for `name`.
    pub(crate) fn has_subscription(&self, name: &str) -> bool {
        self.channels.get(name).is_some_and(|ep| ep.subscriptions > 0)
    }
}

/// Control-side staging area for compound messages.
///
/// `start` clears any previous stage; finishing (via the engine) takes the
/// atoms out, so a failed finish never leaves stale atoms behind.
#[derive(Debug, Default)]
pub(crate) struct MessageStage {
    atoms: Option<Vec<Atom>>,
}

impl MessageStage {
    pub(crate) fn start(&mut self, capacity: usize) {
        self.atoms = Some(Vec::with_capacity(capacity));
    }

    pub(crate) fn add(&mut self, atom: Atom) -> bool {
        match &mut self.atoms {
            Some(atoms) => {
                atoms.push(atom);
                true
            }
            None => false,
        }
    }

    /// Takes the staged atoms, leaving the stage empty.
    pub(crate) fn take(&mut self) -> Option<Vec<Atom>> {
        self.atoms.take()
    }
}
