//! Lifecycle state machine of one agent instance.

use color_eyre::{eyre::eyre, Result};
use std::fmt;

/// Lifecycle phase of an agent instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
  /// Constructed, no lifecycle event received yet
  #[default]
  Parsed,
  /// Install handler running
  Installing,
  /// Installed and waiting for the previous generation to let go
  Installed,
  /// Activate handler running
  Activating,
  /// Serving fetches for claimed clients
  Activated,
  /// Install failed or superseded by a newer generation
  Redundant,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::Parsed => "parsed",
      Phase::Installing => "installing",
      Phase::Installed => "installed",
      Phase::Activating => "activating",
      Phase::Activated => "activated",
      Phase::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Phase plus the pending skip-waiting request.
#[derive(Debug, Default)]
pub struct Lifecycle {
  phase: Phase,
  skip_waiting: bool,
}

impl Lifecycle {
  pub fn phase(&self) -> Phase {
    self.phase
  }

  /// Installed and not yet allowed to activate.
  pub fn is_waiting(&self) -> bool {
    self.phase == Phase::Installed
  }

  pub fn begin_install(&mut self) -> Result<()> {
    self.transition(&[Phase::Parsed], Phase::Installing)
  }

  /// Install completed. Moves on to `Activating` if skip-waiting was requested.
  pub fn install_succeeded(&mut self) -> Result<Phase> {
    self.transition(&[Phase::Installing], Phase::Installed)?;
    if self.skip_waiting {
      self.phase = Phase::Activating;
    }
    Ok(self.phase)
  }

  pub fn install_failed(&mut self) {
    self.phase = Phase::Redundant;
  }

  /// Request to bypass waiting. Returns true if this left the waiting state.
  ///
  /// While installing, the request is remembered and applied on success.
  pub fn skip_waiting(&mut self) -> bool {
    match self.phase {
      Phase::Parsed | Phase::Installing => {
        self.skip_waiting = true;
        false
      }
      Phase::Installed => {
        self.skip_waiting = true;
        self.phase = Phase::Activating;
        true
      }
      Phase::Activating | Phase::Activated | Phase::Redundant => false,
    }
  }

  pub fn begin_activate(&mut self) -> Result<()> {
    self.transition(&[Phase::Installed, Phase::Activating], Phase::Activating)
  }

  pub fn activated(&mut self) -> Result<()> {
    self.transition(&[Phase::Activating], Phase::Activated)
  }

  /// Take over a generation whose store already exists from a previous run.
  pub fn resume(&mut self) -> Result<()> {
    self.transition(&[Phase::Parsed], Phase::Activated)
  }

  /// A newer generation took over.
  pub fn supersede(&mut self) {
    self.phase = Phase::Redundant;
  }

  fn transition(&mut self, from: &[Phase], to: Phase) -> Result<()> {
    if !from.contains(&self.phase) {
      return Err(eyre!("Invalid lifecycle transition: {} -> {}", self.phase, to));
    }
    self.phase = to;
    Ok(())
  }
}
