pub mod auth;
pub mod bridge;
pub mod broadcast;
pub mod conversations;
pub mod middleware;
pub mod notes;
pub mod reconcile;
