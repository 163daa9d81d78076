//! Tab Client - table-side and staff-side client for the TableTab relay
//!
//! Provides the reconnecting relay transport, the per-table session state
//! machine, the staff view aggregator, and the payment provider integration.

pub mod config;
pub mod error;
pub mod mirror;
pub mod payment;
pub mod session;
pub mod staff;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use transport::{ClientEvent, RelayClient};

// Session and staff surfaces
pub use session::{SessionConfig, TableSession};
pub use staff::{Notification, StaffBoard, TableProjection};

// Payment and mirroring seams
pub use mirror::{EndpointResult, EventMirror, MirrorEvent, NoopMirror, RelaySetMirror};
pub use payment::{
    Invoice, LnBitsProvider, PaymentProvider, PaymentStatus, SimulatedProvider, TipRecipient,
    TipShare, provider_from_config,
};

// Re-export shared types for convenience
pub use shared::message::{ClientRole, EventKind, WireMessage};
pub use shared::order::{LineItem, Order, OrderStatus, PaymentData, PaymentMethod};
pub use shared::table::{AssistanceReason, TableStatus};
