//! Rating service: prices raw cloud usage against the product catalog and
//! records the result as CDRs.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod rounding;
pub mod services;
pub mod startup;
