pub mod activity;
pub mod admin;
pub mod chat;
pub mod classes;
pub mod core;
pub mod data_exchange;
pub mod lessons;
pub mod notes;
pub mod settings;
pub mod students;
