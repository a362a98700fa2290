pub mod broadcast;
pub mod connection;
