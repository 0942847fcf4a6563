//! Debounced power-menu state machine.
//!
//! Noisy surface events become at most one `MenuAppeared` per debounce
//! window. The machine is only ever touched from the delivery context, so it
//! holds no locks: each observation is a check-then-set with no await in
//! between.

use serde::{Deserialize, Serialize};

use powerguard_surface::{ClassificationResult, EventKind, SurfaceEvent};

/// Timing and identity settings for the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum gap between two `MenuAppeared` transitions.
    pub debounce_ms: u64,
    /// Delay before the second "back" sent after a detection.
    pub second_back_delay_ms: u64,
    /// Package of the host application. Its own windows never dismiss.
    pub own_package: String,
    /// Class-name fragments that identify the gate overlay.
    pub overlay_markers: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            second_back_delay_ms: 100,
            own_package: "com.powerguard".to_string(),
            overlay_markers: vec![
                "PowerGuard".to_string(),
                "password".to_string(),
                "overlay".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    MenuAppeared,
    MenuDismissed,
}

/// What the detector remembers between events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionState {
    pub visible: bool,
    /// Time of the last `MenuAppeared`, `None` before the first one.
    pub last_transition_ms: Option<u64>,
}

pub struct Detector {
    debounce_ms: u64,
    own_package: String,
    markers: Vec<String>,
    state: DetectionState,
}

impl Detector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            debounce_ms: config.debounce_ms,
            own_package: config.own_package.clone(),
            markers: config
                .overlay_markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            state: DetectionState::default(),
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        if self.state.visible {
            Phase::Triggered
        } else {
            Phase::Idle
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.visible
    }

    /// Feed one classified event observed at `now_ms`.
    ///
    /// The debounce timestamp only moves on `MenuAppeared`, so a dismissal
    /// followed quickly by another match is still suppressed.
    pub fn observe(
        &mut self,
        event: &SurfaceEvent,
        result: &ClassificationResult,
        now_ms: u64,
    ) -> Option<Transition> {
        if result.is_power_menu {
            if self.state.visible || !self.debounce_elapsed(now_ms) {
                return None;
            }
            self.state.visible = true;
            self.state.last_transition_ms = Some(now_ms);
            tracing::debug!(reason = ?result.reason, now_ms, "power menu appeared");
            return Some(Transition::MenuAppeared);
        }

        if self.state.visible && event.kind == EventKind::StateChanged && !self.is_gate_surface(event)
        {
            self.state.visible = false;
            tracing::debug!(class = %event.source_class_name, "power menu dismissed");
            return Some(Transition::MenuDismissed);
        }
        None
    }

    /// The gate resolved (verified or cancelled); the menu is no longer
    /// tracked as visible. Does not restart the debounce window.
    pub fn on_gate_resolved(&mut self) {
        self.state.visible = false;
    }

    /// `true` when `event` comes from the host's own gate overlay.
    pub fn is_gate_surface(&self, event: &SurfaceEvent) -> bool {
        if event.source_package == self.own_package {
            return true;
        }
        let class = event.source_class_name.to_lowercase();
        self.markers.iter().any(|m| class.contains(m.as_str()))
    }

    fn debounce_elapsed(&self, now_ms: u64) -> bool {
        match self.state.last_transition_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > self.debounce_ms,
        }
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(&DetectionConfig::default())
    }
}
