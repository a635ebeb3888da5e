//! Session state: one durable record per phone number holding the current
//! flow and its accumulated answers.

pub mod model;

pub use model::{ConfirmationStep, FlowState, Mode, Session, Transition};
