//! # raffled
//!
//! The raffle pipeline daemon. One process runs the entry API, the change
//! capture relay and the winner consumer against `PostgreSQL` and RedPanda.
//!
//! See [`config::Config`] for the environment variables it reads.

pub mod config;
