//! Invoicing service: turns catalog organizations and their usage into bill
//! runs and invoices, pricing each organization on a shared worker pool.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
