pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod repository;
pub mod routes;
pub mod services;
