pub mod app;
pub mod config;
pub mod corpus;
pub mod cursor;
pub mod domain;
pub mod error;
pub mod harvester;
pub mod hash;
pub mod index;
pub mod kv;
pub mod output;
pub mod reconcile;
pub mod scheduler;
pub mod search;
pub mod sequences;
pub mod server;
pub mod sparql;
