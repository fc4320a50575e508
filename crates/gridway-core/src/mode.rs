//! Execution mode — structured view over the wire bitmask.
//!
//! The wire representation is an integer bitmask for compatibility with
//! existing tooling; callers may also pass a short letter code such as
//! `"dcr"` (distributed + compiled + run). Decoding happens once at the
//! API edge; everything downstream sees [`ExecutionMode`].

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Deployment-action bits. Exactly one must be set.
pub const BIT_RUN: u32 = 1;
pub const BIT_INSTALL: u32 = 2;
pub const BIT_UPGRADE: u32 = 4;
pub const BIT_SIMULATE: u32 = 8;

/// Feature-toggle bits. Orthogonal modifiers.
pub const BIT_COMPILED: u32 = 16;
pub const BIT_DISTRIBUTED: u32 = 32;
pub const BIT_POOLED: u32 = 64;
pub const BIT_ACCELERATED: u32 = 128;

const DEPLOYMENT_MASK: u32 = BIT_RUN | BIT_INSTALL | BIT_UPGRADE | BIT_SIMULATE;
const FEATURE_MASK: u32 = BIT_COMPILED | BIT_DISTRIBUTED | BIT_POOLED | BIT_ACCELERATED;

/// The deployment action selected by the mode's low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Deployment {
    /// Execute work on an already-provisioned cluster.
    Run,
    /// Provision hosts from scratch.
    Install,
    /// Refresh dependencies and artifacts on provisioned hosts.
    Upgrade,
    /// Build the distribution plan and report it without executing.
    Simulate,
}

impl Deployment {
    fn bit(self) -> u32 {
        match self {
            Deployment::Run => BIT_RUN,
            Deployment::Install => BIT_INSTALL,
            Deployment::Upgrade => BIT_UPGRADE,
            Deployment::Simulate => BIT_SIMULATE,
        }
    }

    fn code(self) -> char {
        match self {
            Deployment::Run => 'r',
            Deployment::Install => 'i',
            Deployment::Upgrade => 'u',
            Deployment::Simulate => 's',
        }
    }
}

/// Structured execution mode.
///
/// Immutable once decoded for a run. The deployment action selects the
/// top-level branch in the orchestrator; feature flags are consumed as
/// modifiers by each branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMode {
    pub deployment: Deployment,
    /// Use the natively-compiled work-payload library.
    pub compiled: bool,
    /// Dispatch through the distributed-execution backend.
    pub distributed: bool,
    /// Split each worker's share into pooled sub-jobs.
    pub pooled: bool,
    /// Require accelerator hardware on every host.
    pub accelerated: bool,
}

impl ExecutionMode {
    /// Decode from the wire bitmask.
    ///
    /// Fails if no deployment bit, more than one deployment bit, or any
    /// bit outside the known groups is set.
    pub fn from_bits(bits: u32) -> CoreResult<Self> {
        if bits & !(DEPLOYMENT_MASK | FEATURE_MASK) != 0 {
            return Err(CoreError::InvalidMode(format!(
                "unknown bits in mode {bits:#010b}"
            )));
        }

        let deployment = match bits & DEPLOYMENT_MASK {
            BIT_RUN => Deployment::Run,
            BIT_INSTALL => Deployment::Install,
            BIT_UPGRADE => Deployment::Upgrade,
            BIT_SIMULATE => Deployment::Simulate,
            0 => {
                return Err(CoreError::InvalidMode(format!(
                    "mode {bits} selects no deployment action"
                )));
            }
            _ => {
                return Err(CoreError::InvalidMode(format!(
                    "mode {bits} selects more than one deployment action"
                )));
            }
        };

        Ok(Self {
            deployment,
            compiled: bits & BIT_COMPILED != 0,
            distributed: bits & BIT_DISTRIBUTED != 0,
            pooled: bits & BIT_POOLED != 0,
            accelerated: bits & BIT_ACCELERATED != 0,
        })
    }

    /// Encode to the wire bitmask.
    pub fn to_bits(self) -> u32 {
        let mut bits = self.deployment.bit();
        if self.compiled {
            bits |= BIT_COMPILED;
        }
        if self.distributed {
            bits |= BIT_DISTRIBUTED;
        }
        if self.pooled {
            bits |= BIT_POOLED;
        }
        if self.accelerated {
            bits |= BIT_ACCELERATED;
        }
        bits
    }

    /// Decode from a short letter code, e.g. `"dcr"`.
    ///
    /// Letters: `r`un / `i`nstall / `u`pgrade / `s`imulate select the
    /// deployment action; `c`ompiled, `d`istributed, `p`ooled, `g` (gpu,
    /// accelerated) toggle features. Order does not matter.
    pub fn from_code(code: &str) -> CoreResult<Self> {
        let mut bits: u32 = 0;
        for ch in code.chars() {
            bits |= match ch {
                'r' => BIT_RUN,
                'i' => BIT_INSTALL,
                'u' => BIT_UPGRADE,
                's' => BIT_SIMULATE,
                'c' => BIT_COMPILED,
                'd' => BIT_DISTRIBUTED,
                'p' => BIT_POOLED,
                'g' => BIT_ACCELERATED,
                _ => {
                    return Err(CoreError::InvalidMode(format!(
                        "unknown mode letter '{ch}' in \"{code}\""
                    )));
                }
            };
        }
        Self::from_bits(bits)
    }

    /// Parse either a literal bitmask integer or a letter code.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s.parse::<u32>() {
            Ok(bits) => Self::from_bits(bits),
            Err(_) => Self::from_code(s),
        }
    }

    /// Stable human-readable label, e.g. `"run+compiled+distributed"`.
    pub fn label(self) -> String {
        let mut parts = vec![match self.deployment {
            Deployment::Run => "run",
            Deployment::Install => "install",
            Deployment::Upgrade => "upgrade",
            Deployment::Simulate => "simulate",
        }];
        if self.compiled {
            parts.push("compiled");
        }
        if self.distributed {
            parts.push("distributed");
        }
        if self.pooled {
            parts.push("pooled");
        }
        if self.accelerated {
            parts.push("accelerated");
        }
        parts.join("+")
    }

    /// The canonical letter code for this mode.
    pub fn code(self) -> String {
        let mut s = String::new();
        if self.distributed {
            s.push('d');
        }
        if self.compiled {
            s.push('c');
        }
        if self.pooled {
            s.push('p');
        }
        if self.accelerated {
            s.push('g');
        }
        s.push(self.deployment.code());
        s
    }

    /// Convenience constructor for a plain run.
    pub fn run() -> Self {
        Self {
            deployment: Deployment::Run,
            compiled: false,
            distributed: false,
            pooled: false,
            accelerated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_literal_bits() {
        let from_code = ExecutionMode::from_code("dcr").unwrap();
        let from_bits =
            ExecutionMode::from_bits(BIT_DISTRIBUTED | BIT_COMPILED | BIT_RUN).unwrap();
        assert_eq!(from_code, from_bits);
        assert_eq!(from_code.to_bits(), 49);
    }

    #[test]
    fn bits_round_trip() {
        for bits in [1u32, 2, 4, 8, 17, 49, 113, 241] {
            let mode = ExecutionMode::from_bits(bits).unwrap();
            assert_eq!(mode.to_bits(), bits, "round-trip failed for {bits}");
        }
    }

    #[test]
    fn code_round_trip() {
        let mode = ExecutionMode::from_code("dcpgr").unwrap();
        assert_eq!(ExecutionMode::from_code(&mode.code()).unwrap(), mode);
    }

    #[test]
    fn rejects_no_deployment_bit() {
        assert!(matches!(
            ExecutionMode::from_bits(BIT_COMPILED),
            Err(CoreError::InvalidMode(_))
        ));
    }

    #[test]
    fn rejects_two_deployment_bits() {
        assert!(matches!(
            ExecutionMode::from_bits(BIT_RUN | BIT_INSTALL),
            Err(CoreError::InvalidMode(_))
        ));
    }

    #[test]
    fn rejects_unknown_bits() {
        assert!(ExecutionMode::from_bits(512 | BIT_RUN).is_err());
    }

    #[test]
    fn rejects_unknown_letter() {
        assert!(ExecutionMode::from_code("xr").is_err());
    }

    #[test]
    fn parse_accepts_int_or_code() {
        assert_eq!(
            ExecutionMode::parse("49").unwrap(),
            ExecutionMode::parse("dcr").unwrap()
        );
    }

    #[test]
    fn label_is_stable() {
        let mode = ExecutionMode::from_code("dcr").unwrap();
        assert_eq!(mode.label(), "run+compiled+distributed");
    }
}
