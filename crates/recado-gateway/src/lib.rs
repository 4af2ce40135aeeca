pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod ops;
