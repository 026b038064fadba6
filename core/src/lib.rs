//! # Matchpoint Core
//!
//! Reservation and settlement engine for court time slots and day-use events.
//!
//! ## Components
//!
//! - [`inventory::InventoryLedger`]: atomic capacity reservation and release
//! - [`booking::BookingMachine`]: booking lifecycle and cancellation
//! - [`refund::evaluate`]: time-windowed refund fraction
//! - [`payment::PaymentGateway`]: payment intents, idempotent capture and refunds
//! - [`settlement::SettlementEngine`]: revenue split and settlement batches
//!
//! [`Engine`] wires them to one storage backend and one payment provider.
//!
//! ## Concurrency
//!
//! No component holds a lock across an await. Every mutation is a conditional write through
//! the [`store`] traits, and losers of a race observe a typed error instead of overwriting the
//! winner.

pub mod booking;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod notify;
pub mod payment;
pub mod refund;
pub mod settlement;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::{BookingReceipt, CancelOutcome, Engine, EngineBuilder};
pub use error::{Error, ErrorKind, Result};
