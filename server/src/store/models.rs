/// Record types for every entity kind held by the store.
/// Field names serialize in camelCase to match the web client.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered campus user. The password hash is produced by the login
/// collaborator and stored opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
}

/// Lifecycle of a posted ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: i64,
    pub creator_id: i64,
    pub source: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub available_seats: u32,
    pub cost_per_seat: u32,
    pub status: RideStatus,
    /// Last reported position, for live tracking
    pub current_location: Option<String>,
    /// Encoded route polyline from the maps provider
    pub route_data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRide {
    pub creator_id: i64,
    pub source: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub available_seats: u32,
    pub cost_per_seat: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A user's request to join someone else's ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    pub id: i64,
    pub ride_id: i64,
    pub user_id: i64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRating {
    pub id: i64,
    pub ride_id: i64,
    pub user_id: i64,
    pub rating: i32,
    pub review: Option<String>,
}

/// Chat message posted to a ride's conversation.
/// `user_id` is `None` only when anonymous chat is enabled on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub ride_id: i64,
    pub user_id: Option<i64>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
