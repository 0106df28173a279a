//! Line-oriented patch source parser.
//!
//! ```text
//! # comment
//! object <id> <type> [args...]
//! connect <from-id> <outlet> <to-id> <inlet>
//! array <name> <size>
//! ```
//!
//! Any lexical, reference, arity, or domain-mismatch problem fails with
//! [`EngineError::InvalidPatch`] carrying the 1-based line number. Parsing
//! has no side effects; the caller commits the result only on success.

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::object::{Node, ObjectKind, PortDomain};

/// Parse output: nodes with resolved connections, plus array declarations
/// as `(name, size, line)`.
#[derive(Debug)]
pub(crate) struct ParsedPatch {
    pub nodes: Vec<Node>,
    pub arrays: Vec<(String, usize, usize)>,
}

pub(crate) fn parse(source: &str, config: &EngineConfig) -> Result<ParsedPatch, EngineError> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut by_author_id: HashMap<u32, usize> = HashMap::new();
    let mut arrays: Vec<(String, usize, usize)> = Vec::new();
    let mut connections: Vec<(usize, u32, usize, u32, usize)> = Vec::new();

    for (line_idx, raw) in source.lines().enumerate() {
        let line = line_idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let mut words = text.split_whitespace();
        let keyword = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();
        match keyword {
            "object" => {
                if rest.len() < 2 {
                    return Err(EngineError::invalid_patch(
                        line,
                        "object needs an id and a type",
                    ));
                }
                let id = parse_u32(rest[0], line, "object id")?;
                if by_author_id.contains_key(&id) {
                    return Err(EngineError::invalid_patch(
                        line,
                        format!("duplicate object id {id}"),
                    ));
                }
                let kind = parse_kind(rest[1], &rest[2..], line, config)?;
                by_author_id.insert(id, nodes.len());
                nodes.push(Node::new(id, kind, config));
            }
            "connect" => {
                if rest.len() != 4 {
                    return Err(EngineError::invalid_patch(
                        line,
                        "connect needs <from> <outlet> <to> <inlet>",
                    ));
                }
                let from = parse_u32(rest[0], line, "source object id")?;
                let outlet = parse_usize(rest[1], line, "outlet index")?;
                let to = parse_u32(rest[2], line, "target object id")?;
                let inlet = parse_usize(rest[3], line, "inlet index")?;
                connections.push((line, from, outlet, to, inlet));
            }
            "array" => {
                if rest.len() != 2 {
                    return Err(EngineError::invalid_patch(line, "array needs <name> <size>"));
                }
                let size = parse_usize(rest[1], line, "array size")?;
                if size == 0 {
                    return Err(EngineError::invalid_patch(line, "array size must be nonzero"));
                }
                let name = rest[0].to_owned();
                if arrays.iter().any(|(n, _, _)| *n == name) {
                    return Err(EngineError::invalid_patch(
                        line,
                        format!("duplicate array '{name}'"),
                    ));
                }
                arrays.push((name, size, line));
            }
            other => {
                return Err(EngineError::invalid_patch(
                    line,
                    format!("unknown directive '{other}'"),
                ));
            }
        }
    }

    for (line, from, outlet, to, inlet) in connections {
        let &from_idx = by_author_id.get(&from).ok_or_else(|| {
            EngineError::invalid_patch(line, format!("unknown source object {from}"))
        })?;
        let &to_idx = by_author_id.get(&to).ok_or_else(|| {
            EngineError::invalid_patch(line, format!("unknown target object {to}"))
        })?;
        let out_domain = nodes[from_idx].out_domains.get(outlet).copied().ok_or_else(|| {
            EngineError::invalid_patch(
                line,
                format!("object {from} has no outlet {outlet}"),
            )
        })?;
        let in_domain = nodes[to_idx].in_domains.get(inlet).copied().ok_or_else(|| {
            EngineError::invalid_patch(line, format!("object {to} has no inlet {inlet}"))
        })?;
        if out_domain != in_domain {
            let (from_kind, to_kind) = (
                nodes[from_idx].kind.type_name(),
                nodes[to_idx].kind.type_name(),
            );
            return Err(EngineError::invalid_patch(
                line,
                format!(
                    "domain mismatch: {from_kind} outlet {outlet} cannot feed {to_kind} inlet {inlet}"
                ),
            ));
        }
        if out_domain == PortDomain::Control
            && nodes[from_idx].outs[outlet].contains(&(to_idx, inlet))
        {
            return Err(EngineError::invalid_patch(line, "duplicate connection"));
        }
        nodes[from_idx].outs[outlet].push((to_idx, inlet));
    }

    Ok(ParsedPatch { nodes, arrays })
}

fn parse_kind(
    type_name: &str,
    args: &[&str],
    line: usize,
    config: &EngineConfig,
) -> Result<ObjectKind, EngineError> {
    let float_arg = |idx: usize, default: f32| -> Result<f32, EngineError> {
        match args.get(idx) {
            None => Ok(default),
            Some(text) => text.parse().map_err(|_| {
                EngineError::invalid_patch(line, format!("bad numeric argument '{text}'"))
            }),
        }
    };
    let kind = match type_name {
        "osc~" => ObjectKind::Osc {
            freq: float_arg(0, 440.0)?,
            phase: 0.0,
        },
        "phasor~" => ObjectKind::Phasor {
            freq: float_arg(0, 0.0)?,
            phase: 0.0,
        },
        "sig~" => ObjectKind::Sig {
            value: float_arg(0, 0.0)?,
        },
        "*~" => ObjectKind::Gain {
            coeff: float_arg(0, 1.0)?,
        },
        "delay1~" => ObjectKind::Delay1 {
            prev: vec![0.0; config.block_size],
        },
        "thresh~" => {
            let name = args.get(1).ok_or_else(|| {
                EngineError::invalid_patch(line, "thresh~ needs <level> <name>")
            })?;
            ObjectKind::Thresh {
                level: float_arg(0, 0.0)?,
                name: (*name).to_owned(),
                above: false,
            }
        }
        "adc~" => ObjectKind::Adc,
        "dac~" => ObjectKind::Dac,
        "receive" | "r" => ObjectKind::Receive {
            name: required_name(args, line, "receive")?,
        },
        "send" | "s" => ObjectKind::Send {
            name: required_name(args, line, "send")?,
        },
        "print" => ObjectKind::Print {
            prefix: args.first().map(|s| (*s).to_owned()),
        },
        "metro" => ObjectKind::Metro {
            period_ms: {
                let ms = float_arg(0, 1000.0)?;
                if ms <= 0.0 {
                    return Err(EngineError::invalid_patch(
                        line,
                        "metro period must be positive",
                    ));
                }
                ms
            },
            next_due: None,
        },
        "float" | "f" => ObjectKind::FloatBox {
            value: float_arg(0, 0.0)?,
        },
        "loadbang" => ObjectKind::Loadbang { fired: false },
        "notein" => ObjectKind::Notein,
        "noteout" => ObjectKind::Noteout {
            velocity: float_arg(0, 64.0)?,
            channel: float_arg(1, 0.0)?,
        },
        other => {
            return Err(EngineError::invalid_patch(
                line,
                format!("unknown object type '{other}'"),
            ));
        }
    };
    Ok(kind)
}

fn required_name(args: &[&str], line: usize, what: &str) -> Result<String, EngineError> {
    args.first().map(|s| (*s).to_owned()).ok_or_else(|| {
        EngineError::invalid_patch(line, format!("{what} needs a channel name"))
    })
}

fn parse_u32(text: &str, line: usize, what: &str) -> Result<u32, EngineError> {
    text.parse()
        .map_err(|_| EngineError::invalid_patch(line, format!("bad {what} '{text}'")))
}

fn parse_usize(text: &str, line: usize, what: &str) -> Result<usize, EngineError> {
    text.parse()
        .map_err(|_| EngineError::invalid_patch(line, format!("bad {what} '{text}'")))
}
