//! Named run components and component selections.
//!
//! A run's remote-reported metadata is decomposed into named JSON components
//! (config, summary, ...). Each component lives in its own column so read and
//! export paths can select just the ones they need.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One named decomposition of a run's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunComponent {
    Config,
    Summary,
    Metadata,
    SystemMetrics,
    SystemAttrs,
    SweepInfo,
}

impl RunComponent {
    /// All components, in storage column order.
    pub const ALL: [Self; 6] = [
        Self::Config,
        Self::Summary,
        Self::Metadata,
        Self::SystemMetrics,
        Self::SystemAttrs,
        Self::SweepInfo,
    ];

    /// Component name, which is also its column name in `runs`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Summary => "summary",
            Self::Metadata => "metadata",
            Self::SystemMetrics => "system_metrics",
            Self::SystemAttrs => "system_attrs",
            Self::SweepInfo => "sweep_info",
        }
    }
}

impl fmt::Display for RunComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunComponent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidComponent(format!("unknown component '{s}'")))
    }
}

/// Which components a read or serialization should include.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ComponentSelection {
    /// Every named component plus the catch-all `extra` bucket.
    #[default]
    All,
    /// Bare standard columns only.
    None,
    /// An explicit subset of named components.
    Only(BTreeSet<RunComponent>),
}

impl ComponentSelection {
    /// Selection of a single component.
    #[must_use]
    pub fn only(component: RunComponent) -> Self {
        Self::Only(BTreeSet::from([component]))
    }

    /// Parse an include list.
    ///
    /// Accepts `all` or `none` on their own, or any set of component names.
    /// An empty list selects nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidComponent` for unknown names or when `all`/`none`
    /// is combined with other entries.
    pub fn parse<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .collect();

        if names.iter().any(|n| n == "all" || n == "none") {
            if names.len() != 1 {
                return Err(Error::InvalidComponent(format!(
                    "'all' and 'none' cannot be combined with other components: {}",
                    names.join(",")
                )));
            }
            return Ok(if names[0] == "all" { Self::All } else { Self::None });
        }

        if names.is_empty() {
            return Ok(Self::None);
        }

        let set = names
            .iter()
            .map(|n| n.parse::<RunComponent>())
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self::Only(set))
    }

    /// Whether `component` is selected.
    #[must_use]
    pub fn includes(&self, component: RunComponent) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Only(set) => set.contains(&component),
        }
    }

    /// Whether the catch-all bucket is selected.
    #[must_use]
    pub const fn includes_extra(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Selected components in column order.
    #[must_use]
    pub fn components(&self) -> Vec<RunComponent> {
        RunComponent::ALL
            .into_iter()
            .filter(|c| self.includes(*c))
            .collect()
    }
}
