//! Private stores for handlers that keep state between calls.
//!
//! Appointments and orders live behind explicit create/get interfaces so
//! the in-memory implementations can be swapped for real persistence
//! without touching dispatch logic.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// A scheduled appointment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Appointment {
    pub id: u64,
    pub patient_name: String,
    pub reason: String,
    pub date: String,
    pub status: String,
}

/// Input for creating an appointment.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_name: String,
    pub reason: String,
    pub date: String,
}

/// Appointment persistence interface.
pub trait AppointmentStore: Send + Sync {
    fn create(&self, new: NewAppointment) -> Appointment;
    fn get(&self, id: u64) -> Option<Appointment>;
}

/// A placed pharmacy order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Order {
    pub id: u64,
    pub customer: String,
    pub drug: String,
    pub quantity: u32,
    pub total: f64,
    pub status: String,
}

/// Input for creating an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer: String,
    pub drug: String,
    pub quantity: u32,
    pub total: f64,
}

/// Order persistence interface.
pub trait OrderStore: Send + Sync {
    fn create(&self, new: NewOrder) -> Order;
    fn get(&self, id: u64) -> Option<Order>;
}

struct Sequenced<T> {
    next_id: u64,
    items: HashMap<u64, T>,
}

impl<T> Default for Sequenced<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            items: HashMap::new(),
        }
    }
}

/// In-memory appointment store.
#[derive(Default)]
pub struct MemoryAppointmentStore {
    inner: Mutex<Sequenced<Appointment>>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppointmentStore for MemoryAppointmentStore {
    fn create(&self, new: NewAppointment) -> Appointment {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        let appointment = Appointment {
            id,
            patient_name: new.patient_name,
            reason: new.reason,
            date: new.date,
            status: "scheduled".to_string(),
        };
        inner.items.insert(id, appointment.clone());
        appointment
    }

    fn get(&self, id: u64) -> Option<Appointment> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.items.get(&id).cloned()
    }
}

/// In-memory order store.
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<Sequenced<Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryOrderStore {
    fn create(&self, new: NewOrder) -> Order {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        let order = Order {
            id,
            customer: new.customer,
            drug: new.drug,
            quantity: new.quantity,
            total: new.total,
            status: "pending".to_string(),
        };
        inner.items.insert(id, order.clone());
        order
    }

    fn get(&self, id: u64) -> Option<Order> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.items.get(&id).cloned()
    }
}
