//! Ranked negotiation candidates.
//!
//! Firmware builds differ in control port, header byte order, and whether a
//! login is expected. Instead of branching per build, each guess is one
//! `CandidateConfig` row and the negotiator walks the table in order.

use std::fmt;

use serde::Deserialize;

use stb_protocol::{ByteOrder, Command};

/// Default STB control port.
pub const CONTROL_PORT: u16 = 20000;

/// Command sequence presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    /// Control burst, hello, list-mode, windows, trailer, heartbeat.
    Full,
    /// Hello, list-mode, windows, heartbeat.
    Minimal,
}

/// Index windows queried by the list sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub size: u32,
    pub count: u32,
}

impl Default for WindowPlan {
    fn default() -> Self {
        Self { size: 100, count: 20 }
    }
}

impl WindowPlan {
    /// One `ListWindow` per window, stopping before any bound that would
    /// overflow `u32`.
    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        let size = self.size.max(1);
        (0..self.count).map_while(move |i| {
            let from = i.checked_mul(size)?;
            let to = from.checked_add(size - 1)?;
            Some(Command::ListWindow { from, to })
        })
    }
}

impl SequenceKind {
    /// Expand the preset into the ordered command list.
    pub fn build(self, windows: WindowPlan) -> Vec<Command> {
        let mut seq = Vec::new();
        if self == SequenceKind::Full {
            seq.extend([23, 16, 20, 12, 24].into_iter().map(Command::Control));
        }
        seq.push(Command::Hello);
        seq.push(Command::ListModeSelect);
        seq.extend(windows.commands());
        if self == SequenceKind::Full {
            seq.push(Command::Control(22));
        }
        seq.push(Command::Heartbeat);
        seq
    }
}

/// One row of the candidate table as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CandidateSpec {
    pub port: u16,
    pub byte_order: ByteOrder,
    #[serde(default, alias = "requires_login")]
    pub login: bool,
    #[serde(default = "default_sequence")]
    pub sequence: SequenceKind,
}

fn default_sequence() -> SequenceKind {
    SequenceKind::Full
}

impl CandidateSpec {
    pub fn resolve(&self, windows: WindowPlan) -> CandidateConfig {
        CandidateConfig {
            port: self.port,
            header_byte_order: self.byte_order,
            requires_login: self.login,
            command_sequence: self.sequence.build(windows),
        }
    }
}

/// A fully resolved negotiation candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateConfig {
    pub port: u16,
    pub header_byte_order: ByteOrder,
    pub requires_login: bool,
    pub command_sequence: Vec<Command>,
}

impl fmt::Display for CandidateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}",
            self.port,
            self.header_byte_order.short_name(),
            if self.requires_login { "+login" } else { "" }
        )
    }
}

/// Built-in ranked table.
///
/// Little-endian is tried first: the captures this table was built from
/// decoded cleanly with LE even though some notes called the layout BE.
pub fn default_candidate_specs() -> Vec<CandidateSpec> {
    vec![
        CandidateSpec {
            port: CONTROL_PORT,
            byte_order: ByteOrder::Little,
            login: true,
            sequence: SequenceKind::Full,
        },
        CandidateSpec {
            port: CONTROL_PORT,
            byte_order: ByteOrder::Big,
            login: true,
            sequence: SequenceKind::Full,
        },
        CandidateSpec {
            port: CONTROL_PORT,
            byte_order: ByteOrder::Little,
            login: false,
            sequence: SequenceKind::Minimal,
        },
        CandidateSpec {
            port: CONTROL_PORT + 1,
            byte_order: ByteOrder::Little,
            login: true,
            sequence: SequenceKind::Full,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence_shape() {
        let seq = SequenceKind::Full.build(WindowPlan::default());
        assert_eq!(seq[0], Command::Control(23));
        assert_eq!(seq[5], Command::Hello);
        assert_eq!(seq[6], Command::ListModeSelect);
        assert_eq!(seq[7], Command::ListWindow { from: 0, to: 99 });
        assert_eq!(seq[26], Command::ListWindow { from: 1900, to: 1999 });
        assert_eq!(seq[27], Command::Control(22));
        assert_eq!(seq.last(), Some(&Command::Heartbeat));
        assert_eq!(seq.len(), 29);
    }

    #[test]
    fn test_minimal_sequence_shape() {
        let seq = SequenceKind::Minimal.build(WindowPlan { size: 50, count: 2 });
        assert_eq!(
            seq,
            vec![
                Command::Hello,
                Command::ListModeSelect,
                Command::ListWindow { from: 0, to: 49 },
                Command::ListWindow { from: 50, to: 99 },
                Command::Heartbeat,
            ]
        );
    }

    #[test]
    fn test_oversized_windows_stop_before_overflow() {
        let plan = WindowPlan {
            size: 3_000_000_000,
            count: 3,
        };
        let windows: Vec<Command> = plan.commands().collect();
        assert_eq!(
            windows,
            vec![Command::ListWindow {
                from: 0,
                to: 2_999_999_999
            }]
        );

        let edge = WindowPlan {
            size: u32::MAX,
            count: 2,
        };
        assert_eq!(edge.commands().count(), 1);
    }

    #[test]
    fn test_default_table_ranks_little_endian_first() {
        let specs = default_candidate_specs();
        assert_eq!(specs[0].byte_order, ByteOrder::Little);
        assert_eq!(specs[1].byte_order, ByteOrder::Big);
        let resolved = specs[0].resolve(WindowPlan::default());
        assert!(resolved.requires_login);
        assert_eq!(resolved.to_string(), "20000/LE+login");
    }
}
