//! Function dispatch for the voice agent.
//!
//! The agent service requests local function calls by name; this crate
//! resolves the name to a handler, parses the arguments, and returns the
//! result as a JSON value. Handlers are synchronous local lookups — they
//! may mutate their own private stores (orders, appointments) but never
//! touch session state, and every failure surfaces as a [`FunctionError`]
//! value rather than a panic.

mod error;
mod medical;
mod pharmacy;
mod registry;
mod stores;

pub use error::FunctionError;
pub use registry::{FunctionRegistry, Handler};
pub use stores::{
    Appointment, AppointmentStore, MemoryAppointmentStore, MemoryOrderStore, NewAppointment,
    NewOrder, Order, OrderStore,
};

use serde::de::DeserializeOwned;

/// Parses a handler's argument payload into its typed argument struct.
///
/// Any shape mismatch becomes `FunctionError::InvalidArguments`, which the
/// relay converts into an error-content response envelope.
pub(crate) fn parse_args<T: DeserializeOwned>(args: &serde_json::Value) -> Result<T, FunctionError> {
    serde_json::from_value(args.clone())
        .map_err(|e| FunctionError::InvalidArguments(e.to_string()))
}
