pub mod config;
pub mod controller;
pub mod domain;
pub mod simulation;
pub mod supervisory;
pub mod telemetry;
