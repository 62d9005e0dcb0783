pub mod auth;
pub mod cache;
pub mod grading;
pub mod language;
pub mod leaderboard;
pub mod models;
pub mod participants;
pub mod rate_limit;
pub mod routes;
pub mod sandbox;
pub mod schema;
pub mod scoring;
pub mod setup;
