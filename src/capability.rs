//! Scoped elevation of Linux capabilities.
//!
//! Outside a [`CapabilityBracket`] the process holds no effective capabilities. A bracket raises
//! exactly the capabilities it was asked for, for exactly as long as the guard lives, and lowers
//! them again on every exit path. Brackets are never nested: each privileged primitive takes its
//! own.
//!
//! Linux never lets a process grow its permitted set again once it has been lowered, so "at rest"
//! means an empty effective set with the permitted set narrowed to [`RETAINED`]. Once the last
//! bracket has run, [`relinquish`] empties the permitted set as well.

use std::fmt;

use caps::{CapSet, Capability, CapsHashSet};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

/// Every capability that any bracket in this crate may request.
pub const RETAINED: [Capability; 2] = [Capability::CAP_CHOWN, Capability::CAP_DAC_OVERRIDE];

/// An ordered, non-empty, duplicate-free list of capabilities requested together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: Vec<Capability>,
}

/// How a bracket obtains its privilege.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Raise and lower the process's effective capabilities around each privileged step.
    Capabilities,

    /// Touch no capability state at all and run with whatever access the process already has.
    /// For callers that are not installed with privilege, such as test harnesses.
    Inherited,
}

/// Guard for one privileged operation. Dropping it lowers the effective set.
///
/// If lowering fails the process aborts on the spot: privilege cannot be "probably" dropped.
#[must_use = "the capabilities are lowered again as soon as the bracket is dropped"]
#[derive(Debug)]
pub struct CapabilityBracket {
    caps: CapabilitySet,
    armed: bool,
}

impl CapabilitySet {
    /// Build a set from `caps`, keeping their order.
    pub fn new(caps: &[Capability]) -> Result<CapabilitySet> {
        if caps.is_empty() {
            return Err(privilege_error(
                "empty capability request",
                "",
                "at least one capability is required",
            ));
        }
        let mut unique: Vec<Capability> = Vec::with_capacity(caps.len());
        for &cap in caps {
            if unique.contains(&cap) {
                return Err(privilege_error(
                    "duplicate capability request",
                    &cap.to_string(),
                    "each capability may be requested once",
                ));
            }
            unique.push(cap);
        }
        Ok(CapabilitySet { caps: unique })
    }

    /// The capabilities in the order they were requested.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.caps.iter().copied()
    }

    fn to_hash_set(&self) -> CapsHashSet {
        self.caps.iter().copied().collect()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cap) in self.caps.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{cap}")?;
        }
        Ok(())
    }
}

impl CapabilityBracket {
    /// Raise exactly `caps` into the effective set.
    ///
    /// The effective set is cleared first, so nothing left over from earlier work survives into
    /// the bracket. Any failure leaves the effective set empty and returns an error.
    pub fn acquire(elevation: Elevation, caps: &CapabilitySet) -> Result<CapabilityBracket> {
        let Elevation::Capabilities = elevation else {
            trace!(capabilities = %caps, "bracket with inherited privilege");
            return Ok(CapabilityBracket {
                caps: caps.clone(),
                armed: false,
            });
        };

        let permitted = caps::read(None, CapSet::Permitted).map_err(|e| {
            privilege_error(
                "unable to get process capabilities",
                &caps.to_string(),
                &e.to_string(),
            )
        })?;

        caps::clear(None, CapSet::Effective).map_err(|e| {
            privilege_error(
                "unable to clear capabilities",
                &caps.to_string(),
                &e.to_string(),
            )
        })?;

        if let Some(missing) = caps.iter().find(|cap| !permitted.contains(cap)) {
            return Err(privilege_error(
                "unable to set capabilities",
                &caps.to_string(),
                &format!("{missing} is not in the permitted set"),
            ));
        }

        // From here on the guard exists, so a failed apply still ends with a cleared set.
        let bracket = CapabilityBracket {
            caps: caps.clone(),
            armed: true,
        };
        caps::set(None, CapSet::Effective, &caps.to_hash_set()).map_err(|e| {
            privilege_error(
                "unable to apply capabilities",
                &caps.to_string(),
                &e.to_string(),
            )
        })?;

        debug!(capabilities = %caps, "raised capabilities");
        Ok(bracket)
    }

    /// Lower the capabilities now rather than at the end of the scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CapabilityBracket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = caps::clear(None, CapSet::Effective) {
            error!(capabilities = %self.caps, err = %e, "unable to drop capabilities");
            std::process::abort();
        }
        debug!(capabilities = %self.caps, "lowered capabilities");
    }
}

/// Put the process at rest: empty effective and inheritable sets (which also empties the
/// ambient set), and a permitted set narrowed to `keep`.
///
/// Capabilities in `keep` that the process does not hold are simply not retained.
pub fn retain_only(keep: &[Capability]) -> Result<()> {
    let context = |what: &'static str| {
        move |e: caps::errors::CapsError| privilege_error(what, "all", &e.to_string())
    };

    caps::clear(None, CapSet::Effective).map_err(context("unable to clear effective set"))?;
    caps::clear(None, CapSet::Inheritable).map_err(context("unable to clear inheritable set"))?;

    let permitted =
        caps::read(None, CapSet::Permitted).map_err(context("unable to get permitted set"))?;
    let narrowed: CapsHashSet = keep
        .iter()
        .copied()
        .filter(|cap| permitted.contains(cap))
        .collect();
    caps::set(None, CapSet::Permitted, &narrowed).map_err(context("unable to narrow permitted set"))?;

    debug!(retained = ?narrowed, "capabilities at rest");
    Ok(())
}

/// Drop every capability the process holds, permitted set included. There is no way back.
pub fn relinquish() -> Result<()> {
    for set in [CapSet::Effective, CapSet::Inheritable, CapSet::Permitted] {
        caps::clear(None, set).map_err(|e| {
            privilege_error("unable to drop capabilities", "all", &e.to_string())
        })?;
    }
    debug!("relinquished all capabilities");
    Ok(())
}

/// The capabilities currently in effect.
pub fn effective() -> Result<CapsHashSet> {
    caps::read(None, CapSet::Effective).map_err(|e| {
        privilege_error("unable to get process capabilities", "all", &e.to_string())
    })
}

fn privilege_error(context: &'static str, capabilities: &str, reason: &str) -> Error {
    Error::Privilege {
        context,
        capabilities: capabilities.to_owned(),
        reason: reason.to_owned(),
    }
}
