//! Ride chat: publishing over the relay and history over REST.

pub mod broadcast;
pub mod messages;
