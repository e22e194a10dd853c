pub mod config;
pub mod error;
pub mod game;
pub mod models;
pub mod repository;
pub mod services;
