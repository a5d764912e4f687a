//! Seams to the host game

mod incident;
mod main_thread;

pub use incident::{fire_params, FireParams, Incident, IncidentKey, IncidentRegistry, Target, TargetScope};
pub use main_thread::{spawn_pump, MainThreadHandle, MainThreadQueue};

/// The running game, as far as polls need to know
pub trait GameSession: Send + Sync {
    /// Whether a save is loaded and playing
    fn is_active(&self) -> bool;

    /// The world target, if a session is active
    fn world(&self) -> Option<Target>;

    /// The map the player is looking at, if any
    fn current_map(&self) -> Option<Target>;
}
