//! Strategy layer: expected-value evaluation and the pre-submission safety
//! guardrail.

pub mod ev;
pub mod guardrail;

pub use ev::{calculate_ev, EvResult, Recommendation};
pub use guardrail::{PredictionRequest, Reservation, SafetyConfig, SafetyGuardrail};
