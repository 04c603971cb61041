//! Cart transaction engine.

mod commands;
mod service;
mod view;

pub use commands::{ConvertToOrder, UpsertItem};
pub use service::CartService;
pub use view::{CartLineView, CartView, RemoveOutcome, StoreSummary};
