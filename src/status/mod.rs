//! Order status registry and the optimistic status machine.

pub mod machine;
pub mod registry;

pub use machine::{Snapshot, Transition, apply_transition, read_snapshot, update_status};
pub use registry::{
    OrderStatus, allowed_transitions, is_terminal, is_valid_status, is_valid_transition,
};
