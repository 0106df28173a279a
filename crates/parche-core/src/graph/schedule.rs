//! Signal-subgraph compilation and block execution.
//!
//! The signal objects of a patch are ordered once at load time with Kahn's
//! algorithm and flattened into a step list the audio context replays every
//! block without allocating. Edges into `delay1~` are excluded from the
//! topological constraints; the delayed input is captured at the end of the
//! schedule instead, which is what closes feedback loops with exactly one
//! block of latency.

use tracing::debug;

use crate::error::EngineError;
use crate::graph::object::{Node, ObjectKind, PortDomain, SignalCtx};

/// One instruction of a compiled schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Sum `sources` (pool buffer indices) into `nodes[node].in_bufs[inlet]`.
    Gather {
        node: usize,
        inlet: usize,
        sources: Vec<usize>,
    },
    /// Run `nodes[node]`, writing pool buffers `out_base .. out_base + out_count`.
    Process {
        node: usize,
        out_base: usize,
        out_count: usize,
    },
    /// End-of-block capture of a `delay1~` input for the next block.
    CaptureDelay { node: usize, sources: Vec<usize> },
}

/// Compiled signal schedule for one patch.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    steps: Vec<Step>,
    /// Outlet buffer count; the pool is sized to this at load.
    pool_size: usize,
}

impl Schedule {
    pub(crate) fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Orders the signal subgraph of `nodes` and flattens it into steps.
    ///
    /// Fails with [`EngineError::CyclicGraph`] when a cycle survives the
    /// removal of `delay1~` input edges.
    pub(crate) fn compile(nodes: &[Node]) -> Result<Self, EngineError> {
        // Outlet buffer assignment: contiguous run per signal node.
        let mut out_base = vec![0usize; nodes.len()];
        let mut pool_size = 0usize;
        let mut signal = vec![false; nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            let has_signal_port = node.in_domains.contains(&PortDomain::Signal)
                || node.out_domains.contains(&PortDomain::Signal);
            if !has_signal_port {
                continue;
            }
            signal[idx] = true;
            out_base[idx] = pool_size;
            pool_size += node
                .out_domains
                .iter()
                .filter(|d| **d == PortDomain::Signal)
                .count();
        }

        // Constraint edges: signal connections, minus those feeding delay1~.
        let mut indegree = vec![0usize; nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            if !signal[idx] {
                continue;
            }
            for (outlet, targets) in node.outs.iter().enumerate() {
                if node.out_domains[outlet] != PortDomain::Signal {
                    continue;
                }
                for &(target, _inlet) in targets {
                    if matches!(nodes[target].kind, ObjectKind::Delay1 { .. }) {
                        continue;
                    }
                    dependents[idx].push(target);
                    indegree[target] += 1;
                }
            }
        }

        let mut ready: Vec<usize> = (0..nodes.len())
            .filter(|&i| signal[i] && indegree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(ready.len());
        while let Some(idx) = ready.pop() {
            order.push(idx);
            for &dep in &dependents[idx] {
                indegree[dep] -= 1;
                if indegree[dep] == 0 {
                    ready.push(dep);
                }
            }
        }

        let scheduled = order.len();
        let total = signal.iter().filter(|&&s| s).count();
        if scheduled < total {
            let stuck = (0..nodes.len())
                .find(|&i| signal[i] && indegree[i] > 0)
                .map_or_else(String::new, |i| nodes[i].describe());
            return Err(EngineError::CyclicGraph { object: stuck });
        }

        // Per-inlet source buffers, resolved once.
        let sources_of = |idx: usize, inlet: usize| -> Vec<usize> {
            let mut sources = Vec::new();
            for (src, node) in nodes.iter().enumerate() {
                if !signal[src] {
                    continue;
                }
                let mut sig_outlet = 0;
                for (outlet, targets) in node.outs.iter().enumerate() {
                    if node.out_domains[outlet] != PortDomain::Signal {
                        continue;
                    }
                    for &(target, target_inlet) in targets {
                        if target == idx && target_inlet == inlet {
                            sources.push(out_base[src] + sig_outlet);
                        }
                    }
                    sig_outlet += 1;
                }
            }
            sources
        };

        let mut steps = Vec::new();
        for &idx in &order {
            let node = &nodes[idx];
            let is_delay = matches!(node.kind, ObjectKind::Delay1 { .. });
            if !is_delay {
                for (inlet, domain) in node.in_domains.iter().enumerate() {
                    if *domain != PortDomain::Signal {
                        continue;
                    }
                    let sources = sources_of(idx, inlet);
                    if !sources.is_empty() {
                        steps.push(Step::Gather {
                            node: idx,
                            inlet,
                            sources,
                        });
                    }
                }
            }
            let out_count = node
                .out_domains
                .iter()
                .filter(|d| **d == PortDomain::Signal)
                .count();
            steps.push(Step::Process {
                node: idx,
                out_base: out_base[idx],
                out_count,
            });
        }
        for (idx, node) in nodes.iter().enumerate() {
            if !matches!(node.kind, ObjectKind::Delay1 { .. }) {
                continue;
            }
            let sources = sources_of(idx, 0);
            if !sources.is_empty() {
                steps.push(Step::CaptureDelay { node: idx, sources });
            }
        }

        debug!(
            signal_nodes = total,
            steps = steps.len(),
            pool_buffers = pool_size,
            "compiled signal schedule"
        );
        Ok(Self { steps, pool_size })
    }

    /// Replays the step list for one block.
    ///
    /// `pool` must hold [`pool_size`](Self::pool_size) buffers of at least
    /// `ctx.block_size` samples. Allocation-free.
    pub(crate) fn run(&self, nodes: &mut [Node], pool: &mut [Vec<f32>], ctx: &mut SignalCtx<'_>) {
        let block = ctx.block_size;
        for step in &self.steps {
            match step {
                Step::Gather {
                    node,
                    inlet,
                    sources,
                } => {
                    let buf = &mut nodes[*node].in_bufs[*inlet];
                    buf[..block].fill(0.0);
                    for &src in sources {
                        let source = &pool[src];
                        for i in 0..block {
                            buf[i] += source[i];
                        }
                    }
                }
                Step::Process {
                    node,
                    out_base,
                    out_count,
                } => {
                    let outs = &mut pool[*out_base..*out_base + *out_count];
                    nodes[*node].process_signal(ctx, outs);
                }
                Step::CaptureDelay { node, sources } => {
                    if let ObjectKind::Delay1 { prev } = &mut nodes[*node].kind {
                        prev[..block].fill(0.0);
                        for &src in sources {
                            let source = &pool[src];
                            for i in 0..block {
                                prev[i] += source[i];
                            }
                        }
                    }
                }
            }
        }
    }
}
