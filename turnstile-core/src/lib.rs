pub mod error;
pub mod purchase;
pub mod store;
pub mod ticket;

pub use error::{PurchaseError, StoreError, TicketError};
pub use purchase::{PurchaseClient, SimulatedPurchaseService};
pub use store::TicketStore;
pub use ticket::{Ticket, TicketStatus};
