//! Invoice Chain Service - Gapless, hash-chained fiscal invoicing for bike-shop tenants.

pub mod chain;
pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
