//! Shared settings module.
//!
//! This module defines data structures to access the settings defined for the register
//! allocator. Settings are created from a [`Builder`], which is also where string-based
//! configuration (e.g. from a command line) is parsed:
//!
//! ```ignore
//! use ssa_regalloc::settings::{self, Configurable};
//!
//! let mut b = settings::builder();
//! b.set("regalloc_algorithm", "graph_color")?;
//! b.enable("enable_verifier")?;
//! let flags = settings::Flags::new(b);
//! assert!(flags.enable_verifier());
//! ```

use core::fmt;
use core::str::FromStr;
use std::string::{String, ToString};

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// A string-based configurator for settings groups.
///
/// The `Configurable` protocol allows settings to be modified by name before a finished `Flags`
/// struct is created.
pub trait Configurable {
    /// Set the string value of any setting by name.
    ///
    /// This can set any type of setting whether it is numeric, boolean, or enumerated.
    fn set(&mut self, name: &str, value: &str) -> SetResult<()>;

    /// Enable a boolean setting or apply a preset.
    ///
    /// If the identified setting isn't a boolean or a preset, a `BadType` error is returned.
    fn enable(&mut self, name: &str) -> SetResult<()>;
}

/// An error produced when changing a setting.
#[derive(Debug, PartialEq, Eq)]
pub enum SetError {
    /// No setting by this name exists.
    BadName(String),

    /// Type mismatch for setting (e.g., setting an enum setting as a bool).
    BadType,

    /// This is not a valid value for this setting.
    BadValue(String),
}

impl std::error::Error for SetError {}

impl fmt::Display for SetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetError::BadName(name) => write!(f, "No existing setting named '{name}'"),
            SetError::BadType => {
                write!(f, "Trying to set a setting with the wrong type")
            }
            SetError::BadValue(value) => {
                write!(f, "Unexpected value for a setting, expected {value}")
            }
        }
    }
}

/// A result returned when changing a setting.
pub type SetResult<T> = Result<T, SetError>;

/// The allocation strategy to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum RegallocAlgorithm {
    /// Single forward sweep over intervals sorted by start position.
    #[default]
    LinearScan,
    /// Interference graph coloring with optimistic pruning and retries.
    GraphColor,
}

impl fmt::Display for RegallocAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegallocAlgorithm::LinearScan => "linear_scan",
            RegallocAlgorithm::GraphColor => "graph_color",
        })
    }
}

impl FromStr for RegallocAlgorithm {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear_scan" => Ok(Self::LinearScan),
            "graph_color" => Ok(Self::GraphColor),
            _ => Err(()),
        }
    }
}

/// Default bound on build/prune/color attempts.
pub const DEFAULT_MAX_COLORING_ATTEMPTS: u32 = 100;

/// Collect settings values before creating a `Flags` object.
#[derive(Clone, Debug)]
pub struct Builder {
    regalloc_algorithm: RegallocAlgorithm,
    debuggable: bool,
    enable_verifier: bool,
    enable_coalescing: bool,
    max_coloring_attempts: u32,
}

/// Create a new builder with default settings.
pub fn builder() -> Builder {
    Builder {
        regalloc_algorithm: RegallocAlgorithm::default(),
        debuggable: false,
        enable_verifier: cfg!(debug_assertions),
        enable_coalescing: true,
        max_coloring_attempts: DEFAULT_MAX_COLORING_ATTEMPTS,
    }
}

fn parse_bool_value(value: &str) -> SetResult<bool> {
    match value {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(SetError::BadValue("bool".to_string())),
    }
}

impl Builder {
    fn bool_mut(&mut self, name: &str) -> SetResult<&mut bool> {
        match name {
            "debuggable" => Ok(&mut self.debuggable),
            "enable_verifier" => Ok(&mut self.enable_verifier),
            "enable_coalescing" => Ok(&mut self.enable_coalescing),
            "regalloc_algorithm" | "max_coloring_attempts" => Err(SetError::BadType),
            _ => Err(SetError::BadName(name.to_string())),
        }
    }
}

impl Configurable for Builder {
    fn set(&mut self, name: &str, value: &str) -> SetResult<()> {
        match name {
            "regalloc_algorithm" => {
                self.regalloc_algorithm = value
                    .parse()
                    .map_err(|()| SetError::BadValue("one of: linear_scan, graph_color".into()))?;
            }
            "max_coloring_attempts" => {
                let attempts: u32 = value
                    .parse()
                    .map_err(|_| SetError::BadValue("a positive integer".into()))?;
                if attempts == 0 {
                    return Err(SetError::BadValue("a positive integer".into()));
                }
                self.max_coloring_attempts = attempts;
            }
            _ => *self.bool_mut(name)? = parse_bool_value(value)?,
        }
        Ok(())
    }

    fn enable(&mut self, name: &str) -> SetResult<()> {
        *self.bool_mut(name)? = true;
        Ok(())
    }
}

/// Flags group `shared`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Flags {
    regalloc_algorithm: RegallocAlgorithm,
    debuggable: bool,
    enable_verifier: bool,
    enable_coalescing: bool,
    max_coloring_attempts: u32,
}

impl Flags {
    /// Create flags shared settings group.
    pub fn new(builder: Builder) -> Self {
        Self {
            regalloc_algorithm: builder.regalloc_algorithm,
            debuggable: builder.debuggable,
            enable_verifier: builder.enable_verifier,
            enable_coalescing: builder.enable_coalescing,
            max_coloring_attempts: builder.max_coloring_attempts,
        }
    }

    /// Register allocation strategy.
    pub fn regalloc_algorithm(&self) -> RegallocAlgorithm {
        self.regalloc_algorithm
    }

    /// Keep every value referenced by an environment alive until that environment's holder.
    ///
    /// Without this, only references and values observed by a throwing instruction stay alive
    /// for their environment uses.
    pub fn debuggable(&self) -> bool {
        self.debuggable
    }

    /// Validate the final intervals and fail allocation when two of them conflict.
    pub fn enable_verifier(&self) -> bool {
        self.enable_verifier
    }

    /// Try the colors of related intervals first when coloring, saving moves.
    pub fn enable_coalescing(&self) -> bool {
        self.enable_coalescing
    }

    /// Maximum number of graph coloring attempts before giving up on the function.
    pub fn max_coloring_attempts(&self) -> u32 {
        self.max_coloring_attempts
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new(builder())
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[shared]")?;
        writeln!(f, "regalloc_algorithm = \"{}\"", self.regalloc_algorithm)?;
        writeln!(f, "debuggable = {}", self.debuggable)?;
        writeln!(f, "enable_verifier = {}", self.enable_verifier)?;
        writeln!(f, "enable_coalescing = {}", self.enable_coalescing)?;
        writeln!(f, "max_coloring_attempts = {}", self.max_coloring_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::SetError::*;
    use super::{Configurable, Flags, RegallocAlgorithm, builder};
    use std::string::ToString;

    #[test]
    fn display_default() {
        let mut b = builder();
        b.set("enable_verifier", "false").unwrap();
        let f = Flags::new(b);
        assert_eq!(
            f.to_string(),
            "[shared]\n\
             regalloc_algorithm = \"linear_scan\"\n\
             debuggable = false\n\
             enable_verifier = false\n\
             enable_coalescing = true\n\
             max_coloring_attempts = 100\n"
        );
    }

    #[test]
    fn modify_bool() {
        let mut b = builder();
        assert_eq!(b.enable("not_there"), Err(BadName("not_there".to_string())));
        assert_eq!(b.enable("debuggable"), Ok(()));
        assert_eq!(b.set("enable_coalescing", "off"), Ok(()));
        assert_eq!(b.set("enable_coalescing", "maybe"), Err(BadValue("bool".to_string())));

        let f = Flags::new(b);
        assert!(f.debuggable());
        assert!(!f.enable_coalescing());
    }

    #[test]
    fn modify_enum_and_num() {
        let mut b = builder();
        assert_eq!(b.enable("regalloc_algorithm"), Err(BadType));
        assert!(b.set("regalloc_algorithm", "greedy").is_err());
        assert_eq!(b.set("regalloc_algorithm", "graph_color"), Ok(()));
        assert!(b.set("max_coloring_attempts", "0").is_err());
        assert_eq!(b.set("max_coloring_attempts", "7"), Ok(()));

        let f = Flags::new(b);
        assert_eq!(f.regalloc_algorithm(), RegallocAlgorithm::GraphColor);
        assert_eq!(f.max_coloring_attempts(), 7);
    }
}
